#![deny(unsafe_code)]

pub mod workspace;

pub use workspace::{Workspace, WorkspaceError, ACCOUNTS_FILE, LEDGER_FILE};
