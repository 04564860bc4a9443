use chrono::{DateTime, Utc};
use lockbox_types::{Amount, AssetId, EscrowResult, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Principal to escrow custody.
    Pull,
    /// Escrow custody to principal.
    Push,
}

/// Receipt for a transfer the connector fully executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub asset: AssetId,
    pub direction: TransferDirection,
    pub principal: PrincipalId,
    pub amount: Amount,
    pub settled_at: DateTime<Utc>,
}

/// External fungible-asset ledger the escrow moves value through.
///
/// A call either moves the full amount or moves nothing. The engine calls
/// each method at most once per logical transfer and treats any error as a
/// total failure of that transfer.
pub trait TransferConnector: Send + Sync {
    fn asset(&self) -> AssetId;

    fn pull(&self, from: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt>;

    fn push(&self, to: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt>;

    /// Balance currently held by the escrow custody account.
    fn custody_balance(&self) -> EscrowResult<Amount>;
}

/// Registry of transfer connectors keyed by asset.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<AssetId, Arc<dyn TransferConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    pub fn register(&mut self, connector: Arc<dyn TransferConnector>) {
        self.connectors.insert(connector.asset(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn TransferConnector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, asset: &AssetId) -> Option<Arc<dyn TransferConnector>> {
        self.connectors.get(asset).cloned()
    }

    pub fn has(&self, asset: &AssetId) -> bool {
        self.connectors.contains_key(asset)
    }

    pub fn assets(&self) -> Vec<AssetId> {
        let mut assets: Vec<AssetId> = self.connectors.keys().cloned().collect();
        assets.sort();
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyConnector;

    impl TransferConnector for DummyConnector {
        fn asset(&self) -> AssetId {
            AssetId::new("dummy")
        }

        fn pull(&self, from: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
            Ok(TransferReceipt {
                transfer_id: "t1".to_string(),
                asset: self.asset(),
                direction: TransferDirection::Pull,
                principal: from.clone(),
                amount,
                settled_at: Utc::now(),
            })
        }

        fn push(&self, to: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
            Ok(TransferReceipt {
                transfer_id: "t2".to_string(),
                asset: self.asset(),
                direction: TransferDirection::Push,
                principal: to.clone(),
                amount,
                settled_at: Utc::now(),
            })
        }

        fn custody_balance(&self) -> EscrowResult<Amount> {
            Ok(Amount::zero())
        }
    }

    #[test]
    fn connector_registry_lookup() {
        let registry = ConnectorRegistry::new().with(Arc::new(DummyConnector));
        assert!(registry.has(&AssetId::new("dummy")));
        assert!(registry.get(&AssetId::new("other")).is_none());
        assert_eq!(registry.assets(), vec![AssetId::new("dummy")]);
    }
}
