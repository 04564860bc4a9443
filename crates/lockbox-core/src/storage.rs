use crate::journal::{EventJournal, JournalEntry};
use crate::snapshot::LedgerSnapshot;
use async_trait::async_trait;
use lockbox_types::{EscrowError, EscrowResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshot persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStorageConfig {
    /// Keep the latest snapshot in process memory only.
    Memory,
    /// Persist the latest snapshot as a JSON document on disk.
    File { path: PathBuf },
}

impl SnapshotStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

impl Default for SnapshotStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Ledger snapshot plus the event journal that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLedger {
    pub snapshot: LedgerSnapshot,
    #[serde(default)]
    pub journal: Vec<JournalEntry>,
}

impl StoredLedger {
    pub fn new(snapshot: LedgerSnapshot, journal: &EventJournal) -> Self {
        Self {
            snapshot,
            journal: journal.entries().to_vec(),
        }
    }

    /// Verify the snapshot totals and the journal hash chain.
    pub fn verify(&self) -> EscrowResult<()> {
        self.snapshot.verify()?;
        EventJournal::from_entries(self.journal.clone())?;
        Ok(())
    }

    pub fn journal(&self) -> EscrowResult<EventJournal> {
        EventJournal::from_entries(self.journal.clone())
    }
}

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Latest stored ledger, or `None` when nothing was saved yet.
    async fn load(&self) -> EscrowResult<Option<StoredLedger>>;

    async fn save(&self, ledger: &StoredLedger) -> EscrowResult<()>;

    fn label(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct MemorySnapshotBackend {
    latest: Mutex<Option<StoredLedger>>,
}

impl MemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotBackend for MemorySnapshotBackend {
    async fn load(&self) -> EscrowResult<Option<StoredLedger>> {
        Ok(self.latest.lock().await.clone())
    }

    async fn save(&self, ledger: &StoredLedger) -> EscrowResult<()> {
        ledger.verify()?;
        *self.latest.lock().await = Some(ledger.clone());
        Ok(())
    }

    fn label(&self) -> &'static str {
        "memory"
    }
}

/// JSON file backend. Writes go to a sibling `.tmp` file that is renamed
/// over the target, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotBackend {
    path: PathBuf,
}

impl FileSnapshotBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotBackend for FileSnapshotBackend {
    async fn load(&self) -> EscrowResult<Option<StoredLedger>> {
        let Some(ledger) = read_json::<StoredLedger>(&self.path).await? else {
            return Ok(None);
        };
        ledger.verify()?;
        Ok(Some(ledger))
    }

    async fn save(&self, ledger: &StoredLedger) -> EscrowResult<()> {
        ledger.verify()?;
        write_json_atomic(&self.path, ledger).await
    }

    fn label(&self) -> &'static str {
        "file"
    }
}

pub fn bootstrap(config: SnapshotStorageConfig) -> Arc<dyn SnapshotBackend> {
    match config {
        SnapshotStorageConfig::Memory => Arc::new(MemorySnapshotBackend::new()),
        SnapshotStorageConfig::File { path } => Arc::new(FileSnapshotBackend::new(path)),
    }
}

/// Read a JSON document; a missing file reads as `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> EscrowResult<Option<T>> {
    if !tokio::fs::try_exists(path).await.map_err(storage_error)? {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await.map_err(storage_error)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write a JSON document through a temporary file and an atomic rename.
pub async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> EscrowResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(storage_error)?;
        }
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(storage_error)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(storage_error)?;
    Ok(())
}

fn storage_error(err: std::io::Error) -> EscrowError {
    EscrowError::Storage(err.to_string())
}
