//! Transfer connectors and event sinks for Lockbox.

#![deny(unsafe_code)]

use chrono::Utc;
use lockbox_core::connectors::{TransferConnector, TransferDirection, TransferReceipt};
use lockbox_core::journal::EventSink;
use lockbox_types::{Amount, AssetId, EscrowError, EscrowEvent, EscrowResult, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Balances of one fungible token, including the escrow custody account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalances {
    pub balances: BTreeMap<PrincipalId, Amount>,
    pub custody: Amount,
}

impl TokenBalances {
    pub fn balance_of(&self, holder: &PrincipalId) -> Amount {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    /// Total supply held by principals and custody together.
    pub fn supply(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(self.custody, |acc, balance| acc.checked_add(*balance))
    }
}

/// In-process token ledger for deterministic local simulation.
///
/// Pulls debit the principal and credit custody; pushes do the reverse. A
/// transfer either moves the full amount or leaves every balance unchanged.
#[derive(Debug)]
pub struct InMemoryTokenConnector {
    asset: AssetId,
    state: Mutex<TokenBalances>,
}

impl InMemoryTokenConnector {
    pub fn new(asset: impl Into<String>) -> Self {
        Self::from_balances(asset, TokenBalances::default())
    }

    pub fn from_balances(asset: impl Into<String>, balances: TokenBalances) -> Self {
        Self {
            asset: AssetId::new(asset),
            state: Mutex::new(balances),
        }
    }

    pub fn mint(&self, to: &PrincipalId, amount: Amount) -> EscrowResult<Amount> {
        let mut state = self.lock()?;
        let balance = state.balance_of(to);
        let credited = balance.checked_add(amount).ok_or_else(|| {
            EscrowError::InvalidAmount(format!("minting {amount} to {to} overflows"))
        })?;
        state.balances.insert(to.clone(), credited);
        info!(asset = %self.asset, to = %to, amount = amount.0, "Minted");
        Ok(credited)
    }

    pub fn balance_of(&self, holder: &PrincipalId) -> EscrowResult<Amount> {
        Ok(self.lock()?.balance_of(holder))
    }

    pub fn balances(&self) -> EscrowResult<TokenBalances> {
        Ok(self.lock()?.clone())
    }

    /// Move `amount` between two principals outside the escrow.
    pub fn transfer(
        &self,
        from: &PrincipalId,
        to: &PrincipalId,
        amount: Amount,
    ) -> EscrowResult<()> {
        let mut state = self.lock()?;
        let debited = self.debit(state.balance_of(from), from, amount)?;
        state.balances.insert(from.clone(), debited);
        let credited = self.credit(state.balance_of(to), amount)?;
        state.balances.insert(to.clone(), credited);
        Ok(())
    }

    fn lock(&self) -> EscrowResult<std::sync::MutexGuard<'_, TokenBalances>> {
        self.state.lock().map_err(|_| EscrowError::LockPoisoned)
    }

    fn debit(&self, balance: Amount, holder: &PrincipalId, amount: Amount) -> EscrowResult<Amount> {
        balance.checked_sub(amount).ok_or_else(|| {
            EscrowError::transfer_failed(
                &self.asset,
                format!("insufficient balance: {holder} holds {balance}, needs {amount}"),
            )
        })
    }

    fn credit(&self, balance: Amount, amount: Amount) -> EscrowResult<Amount> {
        balance
            .checked_add(amount)
            .ok_or_else(|| EscrowError::transfer_failed(&self.asset, "balance overflow"))
    }

    fn receipt(
        &self,
        direction: TransferDirection,
        principal: &PrincipalId,
        amount: Amount,
    ) -> TransferReceipt {
        let id = Uuid::new_v4().to_string();
        let short_id: String = id.chars().take(8).collect();
        TransferReceipt {
            transfer_id: format!("{}-{short_id}", self.asset),
            asset: self.asset.clone(),
            direction,
            principal: principal.clone(),
            amount,
            settled_at: Utc::now(),
        }
    }
}

impl TransferConnector for InMemoryTokenConnector {
    fn asset(&self) -> AssetId {
        self.asset.clone()
    }

    fn pull(&self, from: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
        let mut state = self.lock()?;
        let debited = self.debit(state.balance_of(from), from, amount)?;
        let custody = self.credit(state.custody, amount)?;
        state.balances.insert(from.clone(), debited);
        state.custody = custody;
        Ok(self.receipt(TransferDirection::Pull, from, amount))
    }

    fn push(&self, to: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
        let mut state = self.lock()?;
        let custody = state.custody.checked_sub(amount).ok_or_else(|| {
            EscrowError::transfer_failed(
                &self.asset,
                format!("custody holds {}, needs {amount}", state.custody),
            )
        })?;
        let credited = self.credit(state.balance_of(to), amount)?;
        state.custody = custody;
        state.balances.insert(to.clone(), credited);
        Ok(self.receipt(TransferDirection::Push, to, amount))
    }

    fn custody_balance(&self) -> EscrowResult<Amount> {
        Ok(self.lock()?.custody)
    }
}

/// Deterministic failing connector useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailConnector {
    asset: AssetId,
    reason: String,
}

impl AlwaysFailConnector {
    pub fn new(asset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            asset: AssetId::new(asset),
            reason: reason.into(),
        }
    }
}

impl TransferConnector for AlwaysFailConnector {
    fn asset(&self) -> AssetId {
        self.asset.clone()
    }

    fn pull(&self, _from: &PrincipalId, _amount: Amount) -> EscrowResult<TransferReceipt> {
        Err(EscrowError::transfer_failed(&self.asset, self.reason.clone()))
    }

    fn push(&self, _to: &PrincipalId, _amount: Amount) -> EscrowResult<TransferReceipt> {
        Err(EscrowError::transfer_failed(&self.asset, self.reason.clone()))
    }

    fn custody_balance(&self) -> EscrowResult<Amount> {
        Ok(Amount::zero())
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EscrowEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EscrowEvent> {
        self.recorded().clone()
    }

    /// Recovers the events behind a poisoned lock after logging it.
    fn recorded(&self) -> MutexGuard<'_, Vec<EscrowEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| {
            warn!("Recording sink lock poisoned, recovering recorded events");
            poisoned.into_inner()
        })
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EscrowEvent) {
        self.recorded().push(event.clone());
    }
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EscrowEvent) {
        debug!(kind = event.label(), scope = %event.scope(), ?event, "Escrow event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lockbox_core::{ConnectorRegistry, EscrowConfig, EscrowEngine, OwnerAuthority};
    use lockbox_types::{LockTerm, ScopeId};
    use std::sync::Arc;

    fn alice() -> PrincipalId {
        PrincipalId::new("alice")
    }

    #[test]
    fn token_pull_and_push_are_all_or_nothing() {
        let token = InMemoryTokenConnector::new("LBX");
        token.mint(&alice(), Amount::new(10)).unwrap();

        let short = token.pull(&alice(), Amount::new(11));
        assert!(matches!(short, Err(EscrowError::TransferFailed { .. })));
        assert_eq!(token.balance_of(&alice()).unwrap(), Amount::new(10));

        let receipt = token.pull(&alice(), Amount::new(4)).unwrap();
        assert_eq!(receipt.direction, TransferDirection::Pull);
        assert!(receipt.transfer_id.starts_with("LBX-"));
        assert_eq!(token.custody_balance().unwrap(), Amount::new(4));

        let overdraw = token.push(&alice(), Amount::new(5));
        assert!(matches!(overdraw, Err(EscrowError::TransferFailed { .. })));
        token.push(&alice(), Amount::new(4)).unwrap();

        let balances = token.balances().unwrap();
        assert_eq!(balances.balance_of(&alice()), Amount::new(10));
        assert_eq!(balances.custody, Amount::zero());
        assert_eq!(balances.supply(), Some(Amount::new(10)));
    }

    #[test]
    fn token_balances_serialize() {
        let token = InMemoryTokenConnector::new("LBX");
        token.mint(&alice(), Amount::new(7)).unwrap();
        token
            .transfer(&alice(), &PrincipalId::new("bob"), Amount::new(2))
            .unwrap();

        let json = serde_json::to_string(&token.balances().unwrap()).unwrap();
        let restored: TokenBalances = serde_json::from_str(&json).unwrap();
        let reopened = InMemoryTokenConnector::from_balances("LBX", restored);
        assert_eq!(reopened.balance_of(&PrincipalId::new("bob")).unwrap(), Amount::new(2));
    }

    #[test]
    fn engine_round_trip_through_token_ledger() {
        let token = Arc::new(InMemoryTokenConnector::new("LBX"));
        token.mint(&alice(), Amount::new(100)).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let engine = EscrowEngine::new(
            EscrowConfig::project_stake("LBX"),
            ConnectorRegistry::new().with(token.clone()),
            Arc::new(OwnerAuthority::default()),
        )
        .with_sink(sink.clone())
        .with_sink(Arc::new(TracingSink));

        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let p1 = ScopeId::new("p1");
        let handle = engine
            .deposit(&alice(), &p1, Amount::new(100), LockTerm::days(30), t0)
            .unwrap();
        assert_eq!(token.balance_of(&alice()).unwrap(), Amount::zero());

        engine
            .release(&alice(), &p1, handle, t0 + Duration::days(30))
            .unwrap();
        assert_eq!(token.balance_of(&alice()).unwrap(), Amount::new(100));
        assert_eq!(sink.events().len(), 2);
        assert!(engine.reconcile().unwrap().is_consistent());
    }

    #[test]
    fn always_fail_connector_blocks_deposits() {
        let engine = EscrowEngine::new(
            EscrowConfig::generic_lock("LBX"),
            ConnectorRegistry::new().with(Arc::new(AlwaysFailConnector::new("LBX", "rail down"))),
            Arc::new(OwnerAuthority::default()),
        );
        let now = Utc::now();
        let result = engine.deposit(
            &alice(),
            &ScopeId::global(),
            Amount::new(1),
            LockTerm::days(30),
            now,
        );
        match result {
            Err(EscrowError::TransferFailed { message, .. }) => assert_eq!(message, "rail down"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            engine.ledger_total(&alice(), &ScopeId::global()).unwrap(),
            Amount::zero()
        );
    }

    #[test]
    fn recording_sink_survives_poisoned_lock() {
        let sink = RecordingSink::new();
        let contributed = |amount| EscrowEvent::Contributed {
            contributor: alice(),
            scope: ScopeId::new("p1"),
            amount: Amount::new(amount),
        };
        sink.emit(&contributed(1));

        let poisoned = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = sink.events.lock().unwrap();
                    panic!("reader died holding the lock");
                })
                .join()
        });
        assert!(poisoned.is_err());
        assert!(sink.events.is_poisoned());

        sink.emit(&contributed(2));
        assert_eq!(sink.events(), vec![contributed(1), contributed(2)]);
    }
}
