//! Admission policy and administrative capability checks.

use lockbox_types::{EscrowError, EscrowResult, PrincipalId, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Capability check for administrative operations, injected into the engine.
pub trait AdminAuthority: Send + Sync {
    fn is_admin(&self, actor: &PrincipalId) -> bool;
}

/// Grants administration to a fixed set of principals.
#[derive(Debug, Clone, Default)]
pub struct OwnerAuthority {
    owners: BTreeSet<PrincipalId>,
}

impl OwnerAuthority {
    pub fn new(owner: PrincipalId) -> Self {
        Self {
            owners: BTreeSet::from([owner]),
        }
    }

    pub fn with_owner(mut self, owner: PrincipalId) -> Self {
        self.owners.insert(owner);
        self
    }
}

impl AdminAuthority for OwnerAuthority {
    fn is_admin(&self, actor: &PrincipalId) -> bool {
        self.owners.contains(actor)
    }
}

/// Nobody may administer the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthority;

impl AdminAuthority for NoAuthority {
    fn is_admin(&self, _actor: &PrincipalId) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Every scope is implicitly allowed.
    Open,
    /// Only explicitly allowed scopes; unseen scopes are denied.
    AllowList,
}

/// Which scopes may receive deposits and contributions.
///
/// Changes are not retroactive: records already in the ledger stay releasable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    mode: AdmissionMode,
    flags: BTreeMap<ScopeId, bool>,
}

impl AdmissionPolicy {
    pub fn new(mode: AdmissionMode) -> Self {
        Self {
            mode,
            flags: BTreeMap::new(),
        }
    }

    pub fn open() -> Self {
        Self::new(AdmissionMode::Open)
    }

    pub fn allow_list() -> Self {
        Self::new(AdmissionMode::AllowList)
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    pub fn is_allowed(&self, scope: &ScopeId) -> bool {
        match self.mode {
            AdmissionMode::Open => true,
            AdmissionMode::AllowList => self.flags.get(scope).copied().unwrap_or(false),
        }
    }

    pub fn set_allowed(&mut self, scope: &ScopeId, allowed: bool) -> EscrowResult<()> {
        if scope.is_empty() {
            return Err(EscrowError::InvalidScope(scope.0.clone()));
        }
        self.flags.insert(scope.clone(), allowed);
        Ok(())
    }

    pub fn flags(&self) -> &BTreeMap<ScopeId, bool> {
        &self.flags
    }
}
