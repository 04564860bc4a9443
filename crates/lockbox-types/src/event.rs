//! Events announced when the ledger changes

use crate::{Amount, PrincipalId, RecordHandle, ScopeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed ledger state change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscrowEvent {
    Deposited {
        principal: PrincipalId,
        scope: ScopeId,
        handle: RecordHandle,
        amount: Amount,
        maturity: DateTime<Utc>,
    },
    Released {
        principal: PrincipalId,
        scope: ScopeId,
        handle: RecordHandle,
        amount: Amount,
    },
    Contributed {
        contributor: PrincipalId,
        scope: ScopeId,
        amount: Amount,
    },
    PolicyChanged {
        actor: PrincipalId,
        scope: ScopeId,
        allowed: bool,
    },
}

impl EscrowEvent {
    pub fn scope(&self) -> &ScopeId {
        match self {
            EscrowEvent::Deposited { scope, .. }
            | EscrowEvent::Released { scope, .. }
            | EscrowEvent::Contributed { scope, .. }
            | EscrowEvent::PolicyChanged { scope, .. } => scope,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EscrowEvent::Deposited { .. } => "deposited",
            EscrowEvent::Released { .. } => "released",
            EscrowEvent::Contributed { .. } => "contributed",
            EscrowEvent::PolicyChanged { .. } => "policy_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_tagging() {
        let event = EscrowEvent::Contributed {
            contributor: PrincipalId::new("carol"),
            scope: ScopeId::new("p1"),
            amount: Amount::new(50),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "contributed");
        assert_eq!(event.label(), "contributed");
        assert_eq!(event.scope(), &ScopeId::new("p1"));
    }
}
