use crate::admission::AdmissionPolicy;
use crate::aggregator::ScopeAggregator;
use crate::config::{EscrowConfig, RemovalPolicy};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use lockbox_types::{Amount, AssetId, EscrowError, EscrowResult, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SNAPSHOT_VERSION: u32 = 1;

/// All ledger state of one scope: the principals' records and the scope
/// totals. The engine serializes every call on a scope through its shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeShard {
    pub store: RecordStore,
    pub aggregator: ScopeAggregator,
    /// Reason the scope was halted, if it was.
    pub halted: Option<String>,
}

impl ScopeShard {
    pub fn new(scope: ScopeId, policy: RemovalPolicy) -> Self {
        Self {
            store: RecordStore::new(scope.clone(), policy),
            aggregator: ScopeAggregator::new(scope),
            halted: None,
        }
    }

    pub fn scope(&self) -> &ScopeId {
        self.store.scope()
    }

    /// Mutations are refused once an invariant violation halted the scope.
    pub fn ensure_active(&self) -> EscrowResult<()> {
        match self.halted {
            Some(_) => Err(EscrowError::ScopeHalted(self.scope().clone())),
            None => Ok(()),
        }
    }

    pub fn halt(&mut self, reason: impl Into<String>) {
        if self.halted.is_none() {
            self.halted = Some(reason.into());
        }
    }

    /// Check record totals and the scope total against each other.
    pub fn verify(&self, scope: &ScopeId) -> EscrowResult<()> {
        if self.store.scope() != scope || self.aggregator.scope() != scope {
            return Err(EscrowError::Corrupt(format!(
                "shard keyed {scope} holds state of another scope"
            )));
        }
        self.store.verify().map_err(EscrowError::Corrupt)?;

        let principals_total = self.store.sum_of_totals().ok_or_else(|| {
            EscrowError::Corrupt(format!("principal totals of {scope} overflow"))
        })?;
        let scope_total = self.aggregator.stats().total_locked;
        if principals_total != scope_total {
            return Err(EscrowError::Corrupt(format!(
                "scope {scope} locked total {scope_total} differs from principal totals {principals_total}"
            )));
        }
        Ok(())
    }
}

/// Full persisted ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub config: EscrowConfig,
    pub admission: AdmissionPolicy,
    pub shards: BTreeMap<ScopeId, ScopeShard>,
}

impl LedgerSnapshot {
    pub fn verify(&self) -> EscrowResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(EscrowError::Corrupt(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        for (scope, shard) in &self.shards {
            // Halted shards are restored as-is so an operator can inspect them.
            if shard.halted.is_none() {
                shard.verify(scope)?;
            }
            if shard.store.policy() != self.config.removal_policy {
                return Err(EscrowError::Corrupt(format!(
                    "scope {scope} uses a removal policy other than the configured one"
                )));
            }
        }
        Ok(())
    }
}

/// Expected versus custodied balance of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReconciliation {
    pub asset: AssetId,
    /// Locked plus contributed value of every scope resolving to the asset.
    pub expected: Amount,
    /// Balance reported by the asset's transfer connector.
    pub custodied: Amount,
}

impl AssetReconciliation {
    pub fn is_balanced(&self) -> bool {
        self.expected == self.custodied
    }
}

/// Outcome of a full ledger reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub assets: Vec<AssetReconciliation>,
    pub discrepancies: Vec<String>,
    pub halted_scopes: Vec<ScopeId>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && self.assets.iter().all(AssetReconciliation::is_balanced)
    }
}
