//! Error types for the escrow ledger

use crate::{AssetId, PrincipalId, RecordHandle, ScopeId};
use chrono::{DateTime, Utc};

/// Errors that can occur in escrow operations
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Lock too short: requested {requested_secs}s, minimum {minimum_secs}s")]
    LockTooShort {
        requested_secs: i64,
        minimum_secs: i64,
    },

    #[error("Invalid lock term: {0}")]
    InvalidTerm(String),

    #[error("Scope not allowed: {0}")]
    ScopeNotAllowed(ScopeId),

    #[error("Record {handle} not found for {principal} in scope {scope}")]
    NotFound {
        principal: PrincipalId,
        scope: ScopeId,
        handle: RecordHandle,
    },

    #[error("Record {0} already released")]
    AlreadyReleased(RecordHandle),

    #[error("Record {handle} not mature: matures at {maturity}, now {now}")]
    NotMature {
        handle: RecordHandle,
        maturity: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Transfer of {asset} failed: {message}")]
    TransferFailed { asset: AssetId, message: String },

    #[error("Ledger underflow in scope {scope}: {detail}")]
    Underflow { scope: ScopeId, detail: String },

    #[error("Scope {0} halted after an invariant violation")]
    ScopeHalted(ScopeId),

    #[error("Unauthorized administrative action by {0}")]
    Unauthorized(PrincipalId),

    #[error("Invalid scope identifier: {0:?}")]
    InvalidScope(String),

    #[error("Invalid record handle: {0:?}")]
    InvalidHandle(String),

    #[error("Transfer connector not found for asset {0}")]
    ConnectorNotFound(AssetId),

    #[error("Ledger lock poisoned")]
    LockPoisoned,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt ledger state: {0}")]
    Corrupt(String),
}

impl EscrowError {
    /// True for broken-invariant conditions, as opposed to a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EscrowError::Underflow { .. } | EscrowError::ScopeHalted(_) | EscrowError::Corrupt(_)
        )
    }

    pub fn transfer_failed(asset: &AssetId, message: impl Into<String>) -> Self {
        Self::TransferFailed {
            asset: asset.clone(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
