//! Escrow engine: deposit, release, and contribute.
//!
//! Every mutating call on a scope holds that scope's shard lock from
//! validation to commit, including the synchronous transfer call, so calls on
//! one scope are strictly serialized while different scopes proceed in
//! parallel. Lock order is admission, then the shard map, then a shard.
//!
//! Ordering of external transfers against ledger mutation:
//! - deposit and contribute pull value first and record it only after the
//!   pull succeeded;
//! - release pays out first and commits the release only after the payout
//!   succeeded. A failed payout leaves the record and every total untouched,
//!   and the record stays releasable.

use crate::admission::{AdminAuthority, AdmissionPolicy};
use crate::config::EscrowConfig;
use crate::connectors::{ConnectorRegistry, TransferConnector};
use crate::journal::EventSink;
use crate::snapshot::{
    AssetReconciliation, LedgerSnapshot, ReconciliationReport, ScopeShard, SNAPSHOT_VERSION,
};
use chrono::{DateTime, Utc};
use lockbox_types::{
    Amount, AssetId, EscrowError, EscrowEvent, EscrowResult, LockRecord, LockTerm, PrincipalId,
    RecordHandle, ScopeId, ScopeTotals,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn};

type SharedShard = Arc<Mutex<ScopeShard>>;

/// Time-locked escrow ledger.
pub struct EscrowEngine {
    config: EscrowConfig,
    connectors: ConnectorRegistry,
    authority: Arc<dyn AdminAuthority>,
    admission: RwLock<AdmissionPolicy>,
    shards: RwLock<BTreeMap<ScopeId, SharedShard>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EscrowEngine {
    pub fn new(
        config: EscrowConfig,
        connectors: ConnectorRegistry,
        authority: Arc<dyn AdminAuthority>,
    ) -> Self {
        let admission = if config.variant.uses_allow_list() {
            AdmissionPolicy::allow_list()
        } else {
            AdmissionPolicy::open()
        };

        Self {
            config,
            connectors,
            authority,
            admission: RwLock::new(admission),
            shards: RwLock::new(BTreeMap::new()),
            sinks: Vec::new(),
        }
    }

    /// Rebuild an engine from a snapshot after verifying every total.
    pub fn restore(
        snapshot: LedgerSnapshot,
        connectors: ConnectorRegistry,
        authority: Arc<dyn AdminAuthority>,
    ) -> EscrowResult<Self> {
        snapshot.verify()?;

        let shards = snapshot
            .shards
            .into_iter()
            .map(|(scope, shard)| (scope, Arc::new(Mutex::new(shard))))
            .collect();

        Ok(Self {
            config: snapshot.config,
            connectors,
            authority,
            admission: RwLock::new(snapshot.admission),
            shards: RwLock::new(shards),
            sinks: Vec::new(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    // --- Operations ---

    /// Lock `amount` of the scope's asset for `principal` until the term
    /// matures.
    pub fn deposit(
        &self,
        principal: &PrincipalId,
        scope: &ScopeId,
        amount: Amount,
        term: LockTerm,
        now: DateTime<Utc>,
    ) -> EscrowResult<RecordHandle> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount(
                "deposit amount must be greater than zero".to_string(),
            ));
        }
        let (maturity, duration) = term.resolve(now).ok_or_else(|| {
            EscrowError::InvalidTerm(format!("maturity of {term:?} from {now} is out of range"))
        })?;
        let minimum = self.config.minimum_lock();
        if duration < minimum {
            return Err(EscrowError::LockTooShort {
                requested_secs: duration.num_seconds(),
                minimum_secs: minimum.num_seconds(),
            });
        }

        let admission = self.admission.read().map_err(|_| EscrowError::LockPoisoned)?;
        self.admit(&admission, scope)?;
        let connector = self.connector_for(scope)?;
        let shard_ref = self.shard_or_create(scope)?;
        let mut shard = lock_shard(&shard_ref)?;
        shard.ensure_active()?;
        // A principal's total never exceeds its scope total, so this also
        // rules out overflow of the principal ledger.
        shard.aggregator.check_deposit(amount)?;

        self.pull(connector.as_ref(), principal, scope, amount)?;

        let recorded = shard
            .store
            .append(principal, amount, now, maturity)
            .and_then(|handle| shard.aggregator.on_deposit(amount).map(|_| handle));
        let handle = match recorded {
            Ok(handle) => handle,
            Err(err) => {
                self.refund(&mut shard, connector.as_ref(), principal, amount, &err);
                return Err(err);
            }
        };

        info!(
            principal = %principal,
            scope = %scope,
            amount = amount.0,
            handle = %handle,
            maturity = %maturity,
            "Deposit locked"
        );
        self.emit(&EscrowEvent::Deposited {
            principal: principal.clone(),
            scope: scope.clone(),
            handle,
            amount,
            maturity,
        });

        Ok(handle)
    }

    /// Pay a matured record back to its depositor.
    pub fn release(
        &self,
        principal: &PrincipalId,
        scope: &ScopeId,
        handle: RecordHandle,
        now: DateTime<Utc>,
    ) -> EscrowResult<Amount> {
        let shard_ref = self.shard(scope)?.ok_or_else(|| EscrowError::NotFound {
            principal: principal.clone(),
            scope: scope.clone(),
            handle,
        })?;
        let mut shard = lock_shard(&shard_ref)?;
        shard.ensure_active()?;

        let amount = shard
            .store
            .prepare_release(principal, handle, now)
            .and_then(|amount| shard.aggregator.check_release(amount).map(|_| amount))
            .map_err(|err| halt_on_internal(&mut shard, err))?;

        let connector = self.connector_for(scope)?;
        self.push(connector.as_ref(), principal, scope, amount)?;

        let committed = shard
            .store
            .commit_release(principal, handle, now)
            .and_then(|amount| shard.aggregator.on_release(amount));
        if let Err(err) = committed {
            error!(
                principal = %principal,
                scope = %scope,
                handle = %handle,
                amount = amount.0,
                error = %err,
                "Release paid out but could not be committed"
            );
            shard.halt(format!("release of {handle} paid out without commit: {err}"));
            return Err(err);
        }

        info!(
            principal = %principal,
            scope = %scope,
            amount = amount.0,
            handle = %handle,
            "Lock released"
        );
        self.emit(&EscrowEvent::Released {
            principal: principal.clone(),
            scope: scope.clone(),
            handle,
            amount,
        });

        Ok(amount)
    }

    /// Record a non-refundable contribution to a scope.
    pub fn contribute(
        &self,
        contributor: &PrincipalId,
        scope: &ScopeId,
        amount: Amount,
    ) -> EscrowResult<ScopeTotals> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount(
                "contribution amount must be greater than zero".to_string(),
            ));
        }

        let admission = self.admission.read().map_err(|_| EscrowError::LockPoisoned)?;
        self.admit(&admission, scope)?;
        let connector = self.connector_for(scope)?;
        let shard_ref = self.shard_or_create(scope)?;
        let mut shard = lock_shard(&shard_ref)?;
        shard.ensure_active()?;
        shard.aggregator.check_contribution(amount)?;

        self.pull(connector.as_ref(), contributor, scope, amount)?;

        if let Err(err) = shard.aggregator.on_contribution(amount) {
            self.refund(&mut shard, connector.as_ref(), contributor, amount, &err);
            return Err(err);
        }
        let totals = shard.aggregator.stats();

        info!(
            contributor = %contributor,
            scope = %scope,
            amount = amount.0,
            total_contributed = totals.total_contributed.0,
            "Contribution recorded"
        );
        self.emit(&EscrowEvent::Contributed {
            contributor: contributor.clone(),
            scope: scope.clone(),
            amount,
        });

        Ok(totals)
    }

    /// Permit or forbid new deposits and contributions into a scope.
    pub fn set_allowed(
        &self,
        actor: &PrincipalId,
        scope: &ScopeId,
        allowed: bool,
    ) -> EscrowResult<()> {
        if !self.authority.is_admin(actor) {
            warn!(actor = %actor, scope = %scope, "Unauthorized admission change");
            return Err(EscrowError::Unauthorized(actor.clone()));
        }

        let mut admission = self.admission.write().map_err(|_| EscrowError::LockPoisoned)?;
        admission.set_allowed(scope, allowed)?;

        info!(actor = %actor, scope = %scope, allowed, "Admission policy changed");
        self.emit(&EscrowEvent::PolicyChanged {
            actor: actor.clone(),
            scope: scope.clone(),
            allowed,
        });

        Ok(())
    }

    // --- Queries ---

    pub fn ledger_total(&self, principal: &PrincipalId, scope: &ScopeId) -> EscrowResult<Amount> {
        self.read_shard(scope, Amount::zero(), |shard| shard.store.total_for(principal))
    }

    pub fn scope_stats(&self, scope: &ScopeId) -> EscrowResult<ScopeTotals> {
        self.read_shard(scope, ScopeTotals::default(), |shard| {
            shard.aggregator.stats()
        })
    }

    /// Point-in-time copy of a principal's records, in insertion order.
    pub fn list_records(
        &self,
        principal: &PrincipalId,
        scope: &ScopeId,
    ) -> EscrowResult<Vec<LockRecord>> {
        self.read_shard(scope, Vec::new(), |shard| shard.store.all_of(principal))
    }

    pub fn list_entries(
        &self,
        principal: &PrincipalId,
        scope: &ScopeId,
    ) -> EscrowResult<Vec<(RecordHandle, LockRecord)>> {
        self.read_shard(scope, Vec::new(), |shard| shard.store.entries_of(principal))
    }

    pub fn releasable(
        &self,
        principal: &PrincipalId,
        scope: &ScopeId,
        now: DateTime<Utc>,
    ) -> EscrowResult<Vec<(RecordHandle, LockRecord)>> {
        self.read_shard(scope, Vec::new(), |shard| {
            shard.store.releasable(principal, now)
        })
    }

    pub fn is_allowed(&self, scope: &ScopeId) -> EscrowResult<bool> {
        let admission = self.admission.read().map_err(|_| EscrowError::LockPoisoned)?;
        Ok(admission.is_allowed(scope))
    }

    pub fn is_halted(&self, scope: &ScopeId) -> EscrowResult<bool> {
        self.read_shard(scope, false, |shard| shard.halted.is_some())
    }

    pub fn scopes(&self) -> EscrowResult<Vec<ScopeId>> {
        let shards = self.shards.read().map_err(|_| EscrowError::LockPoisoned)?;
        Ok(shards.keys().cloned().collect())
    }

    /// Recompute every total from records and compare custodied balances.
    ///
    /// Every shard stays locked until custody has been read, so the report
    /// never mixes totals and balances from different moments.
    pub fn reconcile(&self) -> EscrowResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        let mut expected: BTreeMap<AssetId, Amount> = self
            .connectors
            .assets()
            .into_iter()
            .map(|asset| (asset, Amount::zero()))
            .collect();

        let shards = self.shards.read().map_err(|_| EscrowError::LockPoisoned)?;
        let mut guards = Vec::with_capacity(shards.len());
        for (scope, shard_ref) in shards.iter() {
            guards.push((scope, lock_shard(shard_ref)?));
        }

        for (scope, shard) in &guards {
            if shard.halted.is_some() {
                report.halted_scopes.push((*scope).clone());
            }
            if let Err(err) = shard.verify(scope) {
                report.discrepancies.push(err.to_string());
            }

            let totals = shard.aggregator.stats();
            let held = totals.total_locked.saturating_add(totals.total_contributed);
            let entry = expected
                .entry(self.config.variant.asset_for(scope))
                .or_default();
            *entry = entry.saturating_add(held);
        }

        for (asset, expected) in expected {
            let Some(connector) = self.connectors.get(&asset) else {
                report
                    .discrepancies
                    .push(format!("no transfer connector for asset {asset}"));
                continue;
            };
            let custodied = connector.custody_balance()?;
            report.assets.push(AssetReconciliation {
                asset,
                expected,
                custodied,
            });
        }

        if !report.is_consistent() {
            warn!(
                discrepancies = report.discrepancies.len(),
                halted = report.halted_scopes.len(),
                "Reconciliation found inconsistencies"
            );
        }
        Ok(report)
    }

    /// Consistent copy of the whole ledger.
    pub fn snapshot(&self) -> EscrowResult<LedgerSnapshot> {
        let admission = self.admission.read().map_err(|_| EscrowError::LockPoisoned)?;
        let shards = self.shards.read().map_err(|_| EscrowError::LockPoisoned)?;

        let mut copied = BTreeMap::new();
        for (scope, shard_ref) in shards.iter() {
            let shard = lock_shard(shard_ref)?;
            copied.insert(scope.clone(), shard.clone());
        }

        Ok(LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            config: self.config.clone(),
            admission: admission.clone(),
            shards: copied,
        })
    }

    // --- Internals ---

    fn admit(&self, admission: &AdmissionPolicy, scope: &ScopeId) -> EscrowResult<()> {
        if scope.is_empty() {
            return Err(EscrowError::InvalidScope(scope.0.clone()));
        }
        if !admission.is_allowed(scope) {
            warn!(scope = %scope, "Scope not admitted");
            return Err(EscrowError::ScopeNotAllowed(scope.clone()));
        }
        Ok(())
    }

    fn connector_for(&self, scope: &ScopeId) -> EscrowResult<Arc<dyn TransferConnector>> {
        let asset = self.config.variant.asset_for(scope);
        self.connectors
            .get(&asset)
            .ok_or(EscrowError::ConnectorNotFound(asset))
    }

    fn shard(&self, scope: &ScopeId) -> EscrowResult<Option<SharedShard>> {
        let shards = self.shards.read().map_err(|_| EscrowError::LockPoisoned)?;
        Ok(shards.get(scope).cloned())
    }

    fn shard_or_create(&self, scope: &ScopeId) -> EscrowResult<SharedShard> {
        if let Some(shard) = self.shard(scope)? {
            return Ok(shard);
        }
        let mut shards = self.shards.write().map_err(|_| EscrowError::LockPoisoned)?;
        let policy = self.config.removal_policy;
        Ok(shards
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ScopeShard::new(scope.clone(), policy))))
            .clone())
    }

    fn read_shard<T>(
        &self,
        scope: &ScopeId,
        missing: T,
        read: impl FnOnce(&ScopeShard) -> T,
    ) -> EscrowResult<T> {
        match self.shard(scope)? {
            Some(shard_ref) => {
                let shard = lock_shard(&shard_ref)?;
                Ok(read(&*shard))
            }
            None => Ok(missing),
        }
    }

    fn pull(
        &self,
        connector: &dyn TransferConnector,
        principal: &PrincipalId,
        scope: &ScopeId,
        amount: Amount,
    ) -> EscrowResult<()> {
        connector.pull(principal, amount).map(|_| ()).map_err(|err| {
            warn!(
                principal = %principal,
                scope = %scope,
                amount = amount.0,
                error = %err,
                "Pull into escrow failed"
            );
            as_transfer_failure(&connector.asset(), err)
        })
    }

    fn push(
        &self,
        connector: &dyn TransferConnector,
        principal: &PrincipalId,
        scope: &ScopeId,
        amount: Amount,
    ) -> EscrowResult<()> {
        connector.push(principal, amount).map(|_| ()).map_err(|err| {
            warn!(
                principal = %principal,
                scope = %scope,
                amount = amount.0,
                error = %err,
                "Payout from escrow failed"
            );
            as_transfer_failure(&connector.asset(), err)
        })
    }

    /// Return pulled value whose bookkeeping could not be recorded. If the
    /// refund fails too, custody and ledger disagree and the scope halts.
    fn refund(
        &self,
        shard: &mut ScopeShard,
        connector: &dyn TransferConnector,
        principal: &PrincipalId,
        amount: Amount,
        cause: &EscrowError,
    ) {
        error!(
            principal = %principal,
            scope = %shard.scope(),
            amount = amount.0,
            error = %cause,
            "Pulled value could not be recorded, refunding"
        );
        if let Err(err) = connector.push(principal, amount) {
            error!(scope = %shard.scope(), error = %err, "Refund failed, halting scope");
            shard.halt(format!(
                "unrecorded pull of {amount} from {principal} could not be refunded: {err}"
            ));
        }
    }

    fn emit(&self, event: &EscrowEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

fn lock_shard(shard: &SharedShard) -> EscrowResult<MutexGuard<'_, ScopeShard>> {
    shard.lock().map_err(|_| EscrowError::LockPoisoned)
}

fn as_transfer_failure(asset: &AssetId, err: EscrowError) -> EscrowError {
    match err {
        EscrowError::TransferFailed { .. } => err,
        other => EscrowError::transfer_failed(asset, other.to_string()),
    }
}

fn halt_on_internal(shard: &mut ScopeShard, err: EscrowError) -> EscrowError {
    if err.is_internal() {
        error!(scope = %shard.scope(), error = %err, "Ledger invariant violated, halting scope");
        shard.halt(err.to_string());
    }
    err
}
