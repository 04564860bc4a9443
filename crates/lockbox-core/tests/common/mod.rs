//! Shared fixtures for the escrow integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use lockbox_core::{
    ConnectorRegistry, EscrowConfig, EscrowEngine, OwnerAuthority, TransferConnector,
    TransferDirection, TransferReceipt,
};
use lockbox_types::{Amount, AssetId, EscrowError, EscrowResult, PrincipalId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const OWNER: &str = "owner";

/// Token ledger with a custody account; either direction can be made to fail.
pub struct MockToken {
    asset: AssetId,
    balances: Mutex<HashMap<PrincipalId, u64>>,
    custody: Mutex<u64>,
    transfers: AtomicU64,
    pub fail_pull: AtomicBool,
    pub fail_push: AtomicBool,
}

impl MockToken {
    pub fn new(asset: &str) -> Arc<Self> {
        Arc::new(Self {
            asset: AssetId::new(asset),
            balances: Mutex::new(HashMap::new()),
            custody: Mutex::new(0),
            transfers: AtomicU64::new(0),
            fail_pull: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
        })
    }

    pub fn mint(&self, to: &str, amount: u64) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry(PrincipalId::new(to))
            .or_default() += amount;
    }

    pub fn balance_of(&self, who: &str) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(&PrincipalId::new(who))
            .copied()
            .unwrap_or(0)
    }

    pub fn custody(&self) -> u64 {
        *self.custody.lock().unwrap()
    }

    pub fn set_fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    fn receipt(
        &self,
        direction: TransferDirection,
        principal: &PrincipalId,
        amount: Amount,
    ) -> TransferReceipt {
        let id = self.transfers.fetch_add(1, Ordering::SeqCst);
        TransferReceipt {
            transfer_id: format!("{}-{id}", self.asset),
            asset: self.asset.clone(),
            direction,
            principal: principal.clone(),
            amount,
            settled_at: Utc::now(),
        }
    }
}

impl TransferConnector for MockToken {
    fn asset(&self) -> AssetId {
        self.asset.clone()
    }

    fn pull(&self, from: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(EscrowError::transfer_failed(&self.asset, "pull disabled"));
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(from.clone()).or_default();
        if *balance < amount.0 {
            return Err(EscrowError::transfer_failed(
                &self.asset,
                format!("{from} holds {balance}, needs {amount}"),
            ));
        }
        *balance -= amount.0;
        *self.custody.lock().unwrap() += amount.0;
        Ok(self.receipt(TransferDirection::Pull, from, amount))
    }

    fn push(&self, to: &PrincipalId, amount: Amount) -> EscrowResult<TransferReceipt> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(EscrowError::transfer_failed(&self.asset, "push disabled"));
        }
        let mut custody = self.custody.lock().unwrap();
        if *custody < amount.0 {
            return Err(EscrowError::transfer_failed(&self.asset, "custody short"));
        }
        *custody -= amount.0;
        *self
            .balances
            .lock()
            .unwrap()
            .entry(to.clone())
            .or_default() += amount.0;
        Ok(self.receipt(TransferDirection::Push, to, amount))
    }

    fn custody_balance(&self) -> EscrowResult<Amount> {
        Ok(Amount::new(self.custody()))
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn engine_with(config: EscrowConfig, tokens: &[Arc<MockToken>]) -> EscrowEngine {
    let mut registry = ConnectorRegistry::new();
    for token in tokens {
        registry.register(token.clone());
    }
    EscrowEngine::new(
        config,
        registry,
        Arc::new(OwnerAuthority::new(PrincipalId::new(OWNER))),
    )
}

pub fn stake_engine() -> (EscrowEngine, Arc<MockToken>) {
    let token = MockToken::new("LBX");
    let engine = engine_with(EscrowConfig::project_stake("LBX"), &[token.clone()]);
    (engine, token)
}
