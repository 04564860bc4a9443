//! Lockbox Domain Types
//!
//! This crate defines the domain types for the Lockbox time-locked escrow
//! ledger: the parties that lock value, the scopes value is locked under,
//! the lock records themselves, and the events announced when the ledger
//! changes.
//!
//! # Key Concepts
//!
//! - **Principal**: the party that deposits and later withdraws value.
//! - **Scope**: the grouping key of a ledger entry. Depending on the ledger
//!   variant it is a project, a token, or the single flat global scope.
//! - **Lock Record**: one deposit commitment with a fixed maturity. It can be
//!   released exactly once, never before maturity.
//! - **Record Handle**: an `(index, generation)` reference to a record slot.
//!   A handle never silently points at a different record.
//!
//! # Architecture
//!
//! This is a pure types crate with no runtime dependencies. IDs use the
//! newtype pattern and implement `Display` and `new()`.

#![deny(unsafe_code)]

mod amount;
mod errors;
mod event;
mod ids;
mod record;

pub use amount::*;
pub use errors::*;
pub use event::*;
pub use ids::*;
pub use record::*;
