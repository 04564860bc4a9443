//! Lockbox escrow engine.
//!
//! Principals lock fungible value under a scope until a maturity time and
//! later withdraw it; third parties may contribute non-refundable value to a
//! scope. The engine keeps per-principal record ledgers, per-scope totals,
//! and an admission policy, and moves value through pluggable transfer
//! connectors. Every committed change is announced to event sinks, and the
//! whole ledger can be snapshotted, persisted, and reconciled against the
//! connectors' custody balances.

#![deny(unsafe_code)]

pub mod admission;
pub mod aggregator;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod journal;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use admission::{AdminAuthority, AdmissionMode, AdmissionPolicy, NoAuthority, OwnerAuthority};
pub use aggregator::ScopeAggregator;
pub use config::{EscrowConfig, LedgerVariant, RemovalPolicy, DEFAULT_MINIMUM_LOCK_SECS};
pub use connectors::{ConnectorRegistry, TransferConnector, TransferDirection, TransferReceipt};
pub use engine::EscrowEngine;
pub use journal::{EventJournal, EventSink, JournalEntry, JournalSink};
pub use snapshot::{
    AssetReconciliation, LedgerSnapshot, ReconciliationReport, ScopeShard, SNAPSHOT_VERSION,
};
pub use storage::{
    bootstrap, FileSnapshotBackend, MemorySnapshotBackend, SnapshotBackend,
    SnapshotStorageConfig, StoredLedger,
};
pub use store::RecordStore;
