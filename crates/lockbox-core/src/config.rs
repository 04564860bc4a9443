use chrono::Duration;
use lockbox_types::{AssetId, ScopeId};
use serde::{Deserialize, Serialize};

/// Default floor on lock duration: 30 days.
pub const DEFAULT_MINIMUM_LOCK_SECS: i64 = 30 * 24 * 60 * 60;

/// What happens to a record slot when the record is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Keep the record flagged `released`; handles are stable forever and
    /// listings include released history.
    Tombstone,
    /// Vacate the slot and advance its generation; the slot may be reused.
    /// Listings only include live records.
    Compact,
}

/// Ledger variant: decides key shape, admission, and asset resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum LedgerVariant {
    /// Single asset, scopes are projects.
    ProjectStake { asset: AssetId },
    /// Single asset, one flat scope ([`ScopeId::global`]).
    GenericLock { asset: AssetId },
    /// Scopes are tokens; each scope must be allow-listed.
    MultiToken,
}

impl LedgerVariant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProjectStake { .. } => "project_stake",
            Self::GenericLock { .. } => "generic_lock",
            Self::MultiToken => "multi_token",
        }
    }

    /// Asset moved when value enters or leaves `scope`.
    pub fn asset_for(&self, scope: &ScopeId) -> AssetId {
        match self {
            Self::ProjectStake { asset } | Self::GenericLock { asset } => asset.clone(),
            Self::MultiToken => AssetId::from(scope),
        }
    }

    pub fn uses_allow_list(&self) -> bool {
        matches!(self, Self::MultiToken)
    }
}

/// Escrow engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    pub variant: LedgerVariant,
    /// Shortest accepted lock, in seconds.
    pub minimum_lock_secs: i64,
    pub removal_policy: RemovalPolicy,
}

impl EscrowConfig {
    pub fn project_stake(asset: impl Into<String>) -> Self {
        Self {
            variant: LedgerVariant::ProjectStake {
                asset: AssetId::new(asset),
            },
            minimum_lock_secs: DEFAULT_MINIMUM_LOCK_SECS,
            removal_policy: RemovalPolicy::Tombstone,
        }
    }

    pub fn generic_lock(asset: impl Into<String>) -> Self {
        Self {
            variant: LedgerVariant::GenericLock {
                asset: AssetId::new(asset),
            },
            minimum_lock_secs: DEFAULT_MINIMUM_LOCK_SECS,
            removal_policy: RemovalPolicy::Compact,
        }
    }

    pub fn multi_token() -> Self {
        Self {
            variant: LedgerVariant::MultiToken,
            minimum_lock_secs: DEFAULT_MINIMUM_LOCK_SECS,
            removal_policy: RemovalPolicy::Tombstone,
        }
    }

    pub fn with_minimum_lock(mut self, minimum: Duration) -> Self {
        self.minimum_lock_secs = minimum.num_seconds().max(0);
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn minimum_lock(&self) -> Duration {
        Duration::try_seconds(self.minimum_lock_secs).unwrap_or(Duration::MAX)
    }
}
