//! Lock records, handles, and per-scope totals

use crate::{Amount, EscrowError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a record slot inside one principal-scope ledger.
///
/// A handle is `(index, generation)`. When a slot is vacated its generation
/// advances, so a handle obtained before the vacancy can never resolve to a
/// record deposited into the reused slot afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordHandle {
    pub index: u32,
    pub generation: u32,
}

impl RecordHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

impl std::str::FromStr for RecordHandle {
    type Err = EscrowError;

    /// Parses `index:generation`; a bare `index` means generation 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EscrowError::InvalidHandle(s.to_string());
        let (index, generation) = match s.split_once(':') {
            Some((index, generation)) => (index, generation),
            None => (s, "0"),
        };
        Ok(Self {
            index: index.trim().parse().map_err(|_| invalid())?,
            generation: generation.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// How long a deposit stays locked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTerm {
    /// Locked for a duration counted from the deposit time
    Duration(Duration),
    /// Locked until an absolute timestamp
    Until(DateTime<Utc>),
}

impl LockTerm {
    /// # Panics
    ///
    /// Panics when `days` is outside the range chrono can represent. Use
    /// [`LockTerm::try_days`] for untrusted input.
    pub fn days(days: i64) -> Self {
        Self::Duration(Duration::days(days))
    }

    /// Duration term from a day count, rejecting counts chrono cannot hold.
    pub fn try_days(days: i64) -> Result<Self, EscrowError> {
        Duration::try_days(days)
            .map(Self::Duration)
            .ok_or_else(|| EscrowError::InvalidTerm(format!("{days} days is out of range")))
    }

    /// Resolve the term against the deposit time.
    ///
    /// Returns the maturity and the effective lock duration, or `None` when
    /// the maturity is not representable.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Duration)> {
        match *self {
            LockTerm::Duration(duration) => {
                let maturity = now.checked_add_signed(duration)?;
                Some((maturity, duration))
            }
            LockTerm::Until(maturity) => Some((maturity, maturity.signed_duration_since(now))),
        }
    }
}

/// Lifecycle state of a lock record. `Matured` is derived from time and
/// never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Created,
    Matured,
    Released,
}

/// One deposit commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Locked quantity, non-zero
    pub amount: Amount,
    /// When the deposit was recorded
    pub created_at: DateTime<Utc>,
    /// Earliest time the record may be released
    pub maturity: DateTime<Utc>,
    /// Set exactly once, by the release that pays the record out
    pub released: bool,
    /// When the record was released
    pub released_at: Option<DateTime<Utc>>,
    /// Insertion number within the owning ledger
    pub sequence: u64,
}

impl LockRecord {
    pub fn new(
        amount: Amount,
        created_at: DateTime<Utc>,
        maturity: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            amount,
            created_at,
            maturity,
            released: false,
            released_at: None,
            sequence,
        }
    }

    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        now >= self.maturity
    }

    pub fn state(&self, now: DateTime<Utc>) -> RecordState {
        if self.released {
            RecordState::Released
        } else if self.is_mature(now) {
            RecordState::Matured
        } else {
            RecordState::Created
        }
    }

    /// Terminal transition. Callers check `released` first.
    pub fn mark_released(&mut self, now: DateTime<Utc>) {
        self.released = true;
        self.released_at = Some(now);
    }
}

/// Cross-principal totals of one scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScopeTotals {
    pub total_locked: Amount,
    pub total_contributed: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_handle_parse() {
        assert_eq!("3:1".parse::<RecordHandle>().unwrap(), RecordHandle::new(3, 1));
        assert_eq!("7".parse::<RecordHandle>().unwrap(), RecordHandle::new(7, 0));
        assert!("x:1".parse::<RecordHandle>().is_err());
        assert_eq!(RecordHandle::new(2, 5).to_string(), "2:5");
    }

    #[test]
    fn test_lock_term_resolution() {
        let (maturity, duration) = LockTerm::days(30).resolve(t0()).unwrap();
        assert_eq!(maturity, t0() + Duration::days(30));
        assert_eq!(duration, Duration::days(30));

        let until = t0() + Duration::days(45);
        let (maturity, duration) = LockTerm::Until(until).resolve(t0()).unwrap();
        assert_eq!(maturity, until);
        assert_eq!(duration, Duration::days(45));
    }

    #[test]
    fn test_lock_term_try_days() {
        assert_eq!(LockTerm::try_days(30).unwrap(), LockTerm::days(30));
        assert!(matches!(
            LockTerm::try_days(i64::MAX / 1000),
            Err(EscrowError::InvalidTerm(_))
        ));
        assert!(matches!(
            LockTerm::try_days(i64::MIN),
            Err(EscrowError::InvalidTerm(_))
        ));
    }

    #[test]
    fn test_record_state() {
        let mut record = LockRecord::new(Amount::new(100), t0(), t0() + Duration::days(30), 0);
        assert_eq!(record.state(t0()), RecordState::Created);
        assert_eq!(record.state(t0() + Duration::days(30)), RecordState::Matured);

        record.mark_released(t0() + Duration::days(31));
        assert_eq!(record.state(t0()), RecordState::Released);
        assert!(record.released_at.is_some());
    }
}
