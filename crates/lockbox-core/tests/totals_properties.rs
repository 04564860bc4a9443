//! Property tests: any sequence of escrow operations keeps every total equal
//! to the records it summarizes.

mod common;

use chrono::Duration;
use common::{engine_with, t0, MockToken};
use lockbox_core::{EscrowConfig, RemovalPolicy};
use lockbox_types::{Amount, EscrowError, LockTerm, PrincipalId, RecordHandle, ScopeId};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PRINCIPALS: [&str; 3] = ["alice", "bob", "carol"];
const SCOPES: [&str; 2] = ["p1", "p2"];

#[derive(Debug, Clone)]
enum Op {
    Deposit {
        principal: usize,
        scope: usize,
        amount: u64,
        days: i64,
    },
    Release {
        principal: usize,
        scope: usize,
        pick: usize,
        after_days: i64,
    },
    Contribute {
        scope: usize,
        amount: u64,
    },
}

fn arb_policy() -> impl Strategy<Value = RemovalPolicy> {
    prop_oneof![Just(RemovalPolicy::Tombstone), Just(RemovalPolicy::Compact)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..PRINCIPALS.len(), 0..SCOPES.len(), 1u64..1_000, 30i64..90).prop_map(
            |(principal, scope, amount, days)| Op::Deposit {
                principal,
                scope,
                amount,
                days,
            }
        ),
        3 => (0..PRINCIPALS.len(), 0..SCOPES.len(), any::<usize>(), 0i64..120).prop_map(
            |(principal, scope, pick, after_days)| Op::Release {
                principal,
                scope,
                pick,
                after_days,
            }
        ),
        1 => (0..SCOPES.len(), 1u64..500).prop_map(|(scope, amount)| Op::Contribute {
            scope,
            amount,
        }),
    ]
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Principal totals equal their live records, scope totals equal the sum
    /// of principal totals, and contributions never decrease.
    #[test]
    fn totals_match_records(
        policy in arb_policy(),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let token = MockToken::new("LBX");
        for name in PRINCIPALS {
            token.mint(name, u32::MAX as u64);
        }
        token.mint("sponsor", u32::MAX as u64);
        let engine = engine_with(
            EscrowConfig::project_stake("LBX").with_removal_policy(policy),
            &[token.clone()],
        );
        let mut handles: Vec<(usize, usize, RecordHandle)> = Vec::new();
        let mut contributed = [0u64; SCOPES.len()];

        for op in ops {
            match op {
                Op::Deposit { principal, scope, amount, days } => {
                    let handle = engine
                        .deposit(
                            &PrincipalId::new(PRINCIPALS[principal]),
                            &ScopeId::new(SCOPES[scope]),
                            Amount::new(amount),
                            LockTerm::days(days),
                            t0(),
                        )
                        .unwrap();
                    handles.push((principal, scope, handle));
                }
                Op::Release { principal, scope, pick, after_days } => {
                    let handle = if handles.is_empty() {
                        RecordHandle::new(0, 0)
                    } else {
                        handles[pick % handles.len()].2
                    };
                    let result = engine.release(
                        &PrincipalId::new(PRINCIPALS[principal]),
                        &ScopeId::new(SCOPES[scope]),
                        handle,
                        t0() + Duration::days(after_days),
                    );
                    match result {
                        Ok(amount) => prop_assert!(!amount.is_zero()),
                        Err(EscrowError::NotFound { .. })
                        | Err(EscrowError::AlreadyReleased(_))
                        | Err(EscrowError::NotMature { .. }) => {}
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
                Op::Contribute { scope, amount } => {
                    let totals = engine
                        .contribute(
                            &PrincipalId::new("sponsor"),
                            &ScopeId::new(SCOPES[scope]),
                            Amount::new(amount),
                        )
                        .unwrap();
                    contributed[scope] += amount;
                    prop_assert_eq!(totals.total_contributed.0, contributed[scope]);
                }
            }

            for (s, scope_name) in SCOPES.iter().enumerate() {
                let scope = ScopeId::new(*scope_name);
                let mut principal_sum = 0u64;
                for name in PRINCIPALS {
                    let principal = PrincipalId::new(name);
                    let live: u64 = engine
                        .list_records(&principal, &scope)
                        .unwrap()
                        .iter()
                        .filter(|record| !record.released)
                        .map(|record| record.amount.0)
                        .sum();
                    let total = engine.ledger_total(&principal, &scope).unwrap().0;
                    prop_assert_eq!(total, live);
                    principal_sum += total;
                }
                let stats = engine.scope_stats(&scope).unwrap();
                prop_assert_eq!(stats.total_locked.0, principal_sum);
                prop_assert_eq!(stats.total_contributed.0, contributed[s]);
            }
        }

        let report = engine.reconcile().unwrap();
        prop_assert!(report.is_consistent(), "{:?}", report);
    }
}
