//! Record store: per-principal lock records of one scope.
//!
//! Records live in an arena of generational slots. A [`RecordHandle`] names a
//! slot plus the generation it was issued for, so vacating a slot under the
//! compact policy can never make an old handle resolve to a newer record.

use crate::config::RemovalPolicy;
use chrono::{DateTime, Utc};
use lockbox_types::{
    Amount, EscrowError, EscrowResult, LockRecord, PrincipalId, RecordHandle, ScopeId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Slot {
    generation: u32,
    record: Option<LockRecord>,
}

/// Why a handle did not resolve to a live record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unresolved {
    Missing,
    Released,
}

/// Lock records and running total of one (principal, scope) pair
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PrincipalLedger {
    slots: Vec<Slot>,
    free: Vec<u32>,
    total_locked: Amount,
    next_sequence: u64,
}

impl PrincipalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_locked(&self) -> Amount {
        self.total_locked
    }

    /// Append a record and add its amount to the running total.
    pub fn append(
        &mut self,
        amount: Amount,
        created_at: DateTime<Utc>,
        maturity: DateTime<Utc>,
    ) -> EscrowResult<RecordHandle> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount(
                "lock amount must be greater than zero".to_string(),
            ));
        }
        let total = self.total_locked.checked_add(amount).ok_or_else(|| {
            EscrowError::InvalidAmount(format!(
                "lock of {} would overflow ledger total {}",
                amount, self.total_locked
            ))
        })?;

        let record = LockRecord::new(amount, created_at, maturity, self.next_sequence);
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = self
                    .slots
                    .get_mut(index as usize)
                    .filter(|slot| slot.record.is_none())
                    .ok_or_else(|| {
                        EscrowError::Corrupt(format!("free list names occupied slot {index}"))
                    })?;
                slot.record = Some(record);
                RecordHandle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| {
                    EscrowError::InvalidAmount("record arena is full".to_string())
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                RecordHandle::new(index, 0)
            }
        };

        self.next_sequence += 1;
        self.total_locked = total;
        Ok(handle)
    }

    fn locate(&self, handle: RecordHandle) -> Result<&LockRecord, Unresolved> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(Unresolved::Missing)?;

        // An older generation was vacated by a release; a newer one was
        // never issued.
        if handle.generation < slot.generation {
            return Err(Unresolved::Released);
        }
        if handle.generation > slot.generation {
            return Err(Unresolved::Missing);
        }

        match &slot.record {
            Some(record) if record.released => Err(Unresolved::Released),
            Some(record) => Ok(record),
            None => Err(Unresolved::Missing),
        }
    }

    pub fn get(&self, handle: RecordHandle) -> Option<&LockRecord> {
        self.locate(handle).ok()
    }

    /// Snapshot of records in insertion order.
    pub fn records(&self) -> Vec<LockRecord> {
        self.entries().into_iter().map(|(_, record)| record).collect()
    }

    /// Snapshot of records with their handles, in insertion order.
    pub fn entries(&self) -> Vec<(RecordHandle, LockRecord)> {
        let mut entries: Vec<(RecordHandle, LockRecord)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.record
                    .as_ref()
                    .map(|record| (RecordHandle::new(index as u32, slot.generation), record.clone()))
            })
            .collect();
        entries.sort_by_key(|(_, record)| record.sequence);
        entries
    }

    /// Sum of unreleased amounts, computed from the records themselves.
    pub fn recomputed_total(&self) -> Option<Amount> {
        self.slots
            .iter()
            .filter_map(|slot| slot.record.as_ref())
            .filter(|record| !record.released)
            .try_fold(Amount::zero(), |acc, record| acc.checked_add(record.amount))
    }

    fn release_slot(&mut self, handle: RecordHandle, now: DateTime<Utc>, policy: RemovalPolicy) {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return;
        };
        match policy {
            RemovalPolicy::Tombstone => {
                if let Some(record) = slot.record.as_mut() {
                    record.mark_released(now);
                }
            }
            RemovalPolicy::Compact => {
                slot.record = None;
                // A slot whose generation cannot advance is retired instead
                // of reused.
                if let Some(next) = slot.generation.checked_add(1) {
                    slot.generation = next;
                    self.free.push(handle.index);
                }
            }
        }
    }
}

/// Record store for one scope, keyed by principal.
///
/// Ledgers are created lazily on first deposit and never destroyed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordStore {
    scope: ScopeId,
    policy: RemovalPolicy,
    ledgers: BTreeMap<PrincipalId, PrincipalLedger>,
}

impl RecordStore {
    pub fn new(scope: ScopeId, policy: RemovalPolicy) -> Self {
        Self {
            scope,
            policy,
            ledgers: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }

    pub fn append(
        &mut self,
        principal: &PrincipalId,
        amount: Amount,
        created_at: DateTime<Utc>,
        maturity: DateTime<Utc>,
    ) -> EscrowResult<RecordHandle> {
        self.ledgers
            .entry(principal.clone())
            .or_default()
            .append(amount, created_at, maturity)
    }

    /// Resolve a handle and check it may be released at `now`.
    ///
    /// Returns the record amount without mutating anything.
    pub fn prepare_release(
        &self,
        principal: &PrincipalId,
        handle: RecordHandle,
        now: DateTime<Utc>,
    ) -> EscrowResult<Amount> {
        let ledger = self
            .ledgers
            .get(principal)
            .ok_or_else(|| self.not_found(principal, handle))?;
        let record = ledger.locate(handle).map_err(|reason| match reason {
            Unresolved::Missing => self.not_found(principal, handle),
            Unresolved::Released => EscrowError::AlreadyReleased(handle),
        })?;

        if !record.is_mature(now) {
            return Err(EscrowError::NotMature {
                handle,
                maturity: record.maturity,
                now,
            });
        }
        if ledger.total_locked < record.amount {
            return Err(EscrowError::Underflow {
                scope: self.scope.clone(),
                detail: format!(
                    "ledger total {} of {} is below record amount {}",
                    ledger.total_locked, principal, record.amount
                ),
            });
        }

        Ok(record.amount)
    }

    /// Release a record previously validated by [`Self::prepare_release`].
    pub fn commit_release(
        &mut self,
        principal: &PrincipalId,
        handle: RecordHandle,
        now: DateTime<Utc>,
    ) -> EscrowResult<Amount> {
        let amount = self.prepare_release(principal, handle, now)?;
        let policy = self.policy;
        let scope = self.scope.clone();
        let ledger = self
            .ledgers
            .get_mut(principal)
            .ok_or_else(|| EscrowError::Corrupt(format!("ledger of {principal} vanished")))?;

        let total = ledger
            .total_locked
            .checked_sub(amount)
            .ok_or_else(|| EscrowError::Underflow {
                scope,
                detail: format!("ledger total of {principal} below {amount}"),
            })?;
        ledger.release_slot(handle, now, policy);
        ledger.total_locked = total;
        Ok(amount)
    }

    /// Validate and release in one step.
    pub fn mark_released(
        &mut self,
        principal: &PrincipalId,
        handle: RecordHandle,
        now: DateTime<Utc>,
    ) -> EscrowResult<Amount> {
        self.commit_release(principal, handle, now)
    }

    pub fn total_for(&self, principal: &PrincipalId) -> Amount {
        self.ledgers
            .get(principal)
            .map(PrincipalLedger::total_locked)
            .unwrap_or_default()
    }

    pub fn all_of(&self, principal: &PrincipalId) -> Vec<LockRecord> {
        self.ledgers
            .get(principal)
            .map(PrincipalLedger::records)
            .unwrap_or_default()
    }

    pub fn entries_of(&self, principal: &PrincipalId) -> Vec<(RecordHandle, LockRecord)> {
        self.ledgers
            .get(principal)
            .map(PrincipalLedger::entries)
            .unwrap_or_default()
    }

    /// Live records of `principal` that may be released at `now`.
    pub fn releasable(
        &self,
        principal: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Vec<(RecordHandle, LockRecord)> {
        self.entries_of(principal)
            .into_iter()
            .filter(|(_, record)| !record.released && record.is_mature(now))
            .collect()
    }

    pub fn principals(&self) -> impl Iterator<Item = &PrincipalId> {
        self.ledgers.keys()
    }

    /// Sum of the running totals of every principal in this scope.
    pub fn sum_of_totals(&self) -> Option<Amount> {
        self.ledgers
            .values()
            .try_fold(Amount::zero(), |acc, ledger| acc.checked_add(ledger.total_locked))
    }

    /// Check every running total against the records it summarizes.
    pub fn verify(&self) -> Result<(), String> {
        for (principal, ledger) in &self.ledgers {
            let recomputed = ledger.recomputed_total().ok_or_else(|| {
                format!("records of {principal} in {} overflow", self.scope)
            })?;
            if recomputed != ledger.total_locked {
                return Err(format!(
                    "total of {principal} in {} is {} but records sum to {}",
                    self.scope, ledger.total_locked, recomputed
                ));
            }
        }
        Ok(())
    }

    fn not_found(&self, principal: &PrincipalId, handle: RecordHandle) -> EscrowError {
        EscrowError::NotFound {
            principal: principal.clone(),
            scope: self.scope.clone(),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn alice() -> PrincipalId {
        PrincipalId::new("alice")
    }

    fn store(policy: RemovalPolicy) -> RecordStore {
        RecordStore::new(ScopeId::new("p1"), policy)
    }

    #[test]
    fn test_append_updates_total() {
        let mut store = store(RemovalPolicy::Tombstone);
        let maturity = t0() + Duration::days(30);

        store.append(&alice(), Amount::new(100), t0(), maturity).unwrap();
        store.append(&alice(), Amount::new(40), t0(), maturity).unwrap();

        assert_eq!(store.total_for(&alice()), Amount::new(140));
        assert_eq!(store.all_of(&alice()).len(), 2);
        assert_eq!(store.total_for(&PrincipalId::new("bob")), Amount::zero());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut store = store(RemovalPolicy::Tombstone);
        let result = store.append(&alice(), Amount::zero(), t0(), t0());
        assert!(matches!(result, Err(EscrowError::InvalidAmount(_))));
        assert!(store.all_of(&alice()).is_empty());
    }

    #[test]
    fn test_maturity_boundary() {
        let mut store = store(RemovalPolicy::Tombstone);
        let maturity = t0() + Duration::days(30);
        let handle = store.append(&alice(), Amount::new(100), t0(), maturity).unwrap();

        let early = store.mark_released(&alice(), handle, maturity - Duration::seconds(1));
        assert!(matches!(early, Err(EscrowError::NotMature { .. })));

        let amount = store.mark_released(&alice(), handle, maturity).unwrap();
        assert_eq!(amount, Amount::new(100));
        assert_eq!(store.total_for(&alice()), Amount::zero());
    }

    #[test]
    fn test_tombstone_keeps_history() {
        let mut store = store(RemovalPolicy::Tombstone);
        let handle = store.append(&alice(), Amount::new(100), t0(), t0()).unwrap();
        store.mark_released(&alice(), handle, t0()).unwrap();

        let records = store.all_of(&alice());
        assert_eq!(records.len(), 1);
        assert!(records[0].released);
        assert_eq!(records[0].released_at, Some(t0()));

        let again = store.mark_released(&alice(), handle, t0());
        assert!(matches!(again, Err(EscrowError::AlreadyReleased(_))));
    }

    #[test]
    fn test_compact_reuses_slot_with_new_generation() {
        let mut store = store(RemovalPolicy::Compact);
        let first = store.append(&alice(), Amount::new(100), t0(), t0()).unwrap();
        let second = store.append(&alice(), Amount::new(50), t0(), t0()).unwrap();

        store.mark_released(&alice(), first, t0()).unwrap();
        assert_eq!(store.all_of(&alice()).len(), 1);

        let third = store.append(&alice(), Amount::new(25), t0(), t0()).unwrap();
        assert_eq!(third.index, first.index);
        assert_eq!(third.generation, first.generation + 1);

        // The stale handle does not reach the record now living in its slot.
        let stale = store.mark_released(&alice(), first, t0());
        assert!(matches!(stale, Err(EscrowError::AlreadyReleased(_))));
        assert_eq!(store.total_for(&alice()), Amount::new(75));

        // Untouched handles stay valid across the release.
        assert_eq!(store.mark_released(&alice(), second, t0()).unwrap(), Amount::new(50));
    }

    #[test]
    fn test_unknown_handles() {
        let mut store = store(RemovalPolicy::Compact);
        let missing = store.prepare_release(&alice(), RecordHandle::new(0, 0), t0());
        assert!(matches!(missing, Err(EscrowError::NotFound { .. })));

        store.append(&alice(), Amount::new(10), t0(), t0()).unwrap();
        let forged = store.prepare_release(&alice(), RecordHandle::new(0, 9), t0());
        assert!(matches!(forged, Err(EscrowError::NotFound { .. })));
        let out_of_range = store.prepare_release(&alice(), RecordHandle::new(4, 0), t0());
        assert!(matches!(out_of_range, Err(EscrowError::NotFound { .. })));
    }

    #[test]
    fn test_entries_follow_insertion_order_after_reuse() {
        let mut store = store(RemovalPolicy::Compact);
        let first = store.append(&alice(), Amount::new(1), t0(), t0()).unwrap();
        store.append(&alice(), Amount::new(2), t0(), t0()).unwrap();
        store.mark_released(&alice(), first, t0()).unwrap();
        store.append(&alice(), Amount::new(3), t0(), t0()).unwrap();

        let amounts: Vec<u64> = store.all_of(&alice()).iter().map(|r| r.amount.0).collect();
        assert_eq!(amounts, vec![2, 3]);
    }

    #[test]
    fn test_releasable_filters_immature() {
        let mut store = store(RemovalPolicy::Tombstone);
        store.append(&alice(), Amount::new(1), t0(), t0() + Duration::days(1)).unwrap();
        store.append(&alice(), Amount::new(2), t0(), t0() + Duration::days(10)).unwrap();

        let ready = store.releasable(&alice(), t0() + Duration::days(2));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1.amount, Amount::new(1));
        assert!(store.verify().is_ok());
    }
}
