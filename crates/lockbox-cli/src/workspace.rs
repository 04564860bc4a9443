//! File-backed ledger workspace driven by `lockboxctl`.
//!
//! A workspace directory holds two JSON documents:
//! - `ledger.json`: the engine snapshot plus its event journal;
//! - `accounts.json`: the administrators and the simulated token balances.

use lockbox_adapters::{InMemoryTokenConnector, TokenBalances, TracingSink};
use lockbox_core::storage::{read_json, write_json_atomic};
use lockbox_core::{
    bootstrap, ConnectorRegistry, EscrowConfig, EscrowEngine, EventJournal, JournalSink,
    LedgerSnapshot, LedgerVariant, OwnerAuthority, SnapshotBackend, SnapshotStorageConfig,
    StoredLedger, TransferConnector,
};
use lockbox_types::{Amount, AssetId, EscrowError, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const LEDGER_FILE: &str = "ledger.json";
pub const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no ledger initialized at {0}")]
    NotInitialized(PathBuf),
    #[error("ledger already initialized at {0}")]
    AlreadyInitialized(PathBuf),
    #[error("multi-token ledgers need an explicit --asset")]
    AssetRequired,
    #[error("asset {asset} is not traded by a {variant} ledger")]
    ForeignAsset { asset: AssetId, variant: &'static str },
    #[error("escrow error: {0}")]
    Escrow(#[from] EscrowError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountsFile {
    owners: Vec<PrincipalId>,
    tokens: BTreeMap<AssetId, TokenBalances>,
}

pub struct Workspace {
    dir: PathBuf,
    storage: Arc<dyn SnapshotBackend>,
    engine: EscrowEngine,
    journal: Arc<JournalSink>,
    owners: Vec<PrincipalId>,
    tokens: BTreeMap<AssetId, Arc<InMemoryTokenConnector>>,
}

impl Workspace {
    /// Create a fresh ledger in `dir`. Refuses to overwrite unless `force`.
    pub async fn init(
        dir: impl Into<PathBuf>,
        config: EscrowConfig,
        owners: Vec<PrincipalId>,
        force: bool,
    ) -> Result<Self, WorkspaceError> {
        let dir = dir.into();
        let ledger_path = dir.join(LEDGER_FILE);
        let exists = tokio::fs::try_exists(&ledger_path).await.unwrap_or(false);
        if exists && !force {
            return Err(WorkspaceError::AlreadyInitialized(dir));
        }

        let mut tokens = BTreeMap::new();
        match &config.variant {
            LedgerVariant::ProjectStake { asset } | LedgerVariant::GenericLock { asset } => {
                tokens.insert(
                    asset.clone(),
                    Arc::new(InMemoryTokenConnector::new(asset.as_str())),
                );
            }
            LedgerVariant::MultiToken => {}
        }

        let snapshot = EscrowEngine::new(
            config,
            ConnectorRegistry::new(),
            Arc::new(OwnerAuthority::default()),
        )
        .snapshot()?;
        let storage = ledger_storage(&dir);
        let workspace =
            Self::assemble(dir, storage, snapshot, EventJournal::new(), owners, tokens)?;
        workspace.save().await?;

        info!(
            dir = %workspace.dir.display(),
            variant = workspace.engine.config().variant.label(),
            "Ledger initialized"
        );
        Ok(workspace)
    }

    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let dir = dir.into();
        let storage = ledger_storage(&dir);
        let stored = storage
            .load()
            .await?
            .ok_or_else(|| WorkspaceError::NotInitialized(dir.clone()))?;
        let accounts: AccountsFile = read_json(&dir.join(ACCOUNTS_FILE))
            .await?
            .unwrap_or_default();

        let tokens = accounts
            .tokens
            .into_iter()
            .map(|(asset, balances)| {
                let connector = InMemoryTokenConnector::from_balances(asset.as_str(), balances);
                (asset, Arc::new(connector))
            })
            .collect();
        let journal = stored.journal()?;
        Self::assemble(dir, storage, stored.snapshot, journal, accounts.owners, tokens)
    }

    pub async fn save(&self) -> Result<(), WorkspaceError> {
        let stored = StoredLedger::new(self.engine.snapshot()?, &self.journal.snapshot()?);
        self.storage.save(&stored).await?;

        let mut accounts = AccountsFile {
            owners: self.owners.clone(),
            tokens: BTreeMap::new(),
        };
        for (asset, token) in &self.tokens {
            accounts.tokens.insert(asset.clone(), token.balances()?);
        }
        write_json_atomic(&self.dir.join(ACCOUNTS_FILE), &accounts).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn engine(&self) -> &EscrowEngine {
        &self.engine
    }

    pub fn journal(&self) -> Result<EventJournal, WorkspaceError> {
        Ok(self.journal.snapshot()?)
    }

    /// The config asset for single-asset ledgers; multi-token ledgers need an
    /// explicit asset.
    pub fn resolve_asset(&self, requested: Option<&str>) -> Result<AssetId, WorkspaceError> {
        let variant = &self.engine.config().variant;
        let own = match variant {
            LedgerVariant::ProjectStake { asset } | LedgerVariant::GenericLock { asset } => asset,
            LedgerVariant::MultiToken => {
                return requested
                    .map(AssetId::new)
                    .ok_or(WorkspaceError::AssetRequired);
            }
        };
        match requested {
            Some(requested) if requested != own.as_str() => Err(WorkspaceError::ForeignAsset {
                asset: AssetId::new(requested),
                variant: variant.label(),
            }),
            _ => Ok(own.clone()),
        }
    }

    /// Credit simulated tokens to a principal, creating the token on first use.
    pub fn mint(
        &mut self,
        asset: &AssetId,
        to: &PrincipalId,
        amount: Amount,
    ) -> Result<Amount, WorkspaceError> {
        if !self.tokens.contains_key(asset) {
            self.tokens.insert(
                asset.clone(),
                Arc::new(InMemoryTokenConnector::new(asset.as_str())),
            );
            self.rebuild()?;
        }
        let token = self
            .tokens
            .get(asset)
            .ok_or_else(|| EscrowError::ConnectorNotFound(asset.clone()))?;
        Ok(token.mint(to, amount)?)
    }

    pub fn balance_of(
        &self,
        asset: &AssetId,
        holder: &PrincipalId,
    ) -> Result<Amount, WorkspaceError> {
        match self.tokens.get(asset) {
            Some(token) => Ok(token.balance_of(holder)?),
            None => Ok(Amount::zero()),
        }
    }

    pub fn custody_of(&self, asset: &AssetId) -> Result<Amount, WorkspaceError> {
        match self.tokens.get(asset) {
            Some(token) => Ok(token.custody_balance()?),
            None => Ok(Amount::zero()),
        }
    }

    fn assemble(
        dir: PathBuf,
        storage: Arc<dyn SnapshotBackend>,
        snapshot: LedgerSnapshot,
        journal: EventJournal,
        owners: Vec<PrincipalId>,
        tokens: BTreeMap<AssetId, Arc<InMemoryTokenConnector>>,
    ) -> Result<Self, WorkspaceError> {
        let journal = Arc::new(JournalSink::from_journal(journal));
        let engine = build_engine(snapshot, &owners, &tokens, &journal)?;
        Ok(Self {
            dir,
            storage,
            engine,
            journal,
            owners,
            tokens,
        })
    }

    /// Re-create the engine so it sees the current token set.
    fn rebuild(&mut self) -> Result<(), WorkspaceError> {
        let snapshot = self.engine.snapshot()?;
        self.engine = build_engine(snapshot, &self.owners, &self.tokens, &self.journal)?;
        Ok(())
    }
}

fn ledger_storage(dir: &Path) -> Arc<dyn SnapshotBackend> {
    bootstrap(SnapshotStorageConfig::file(dir.join(LEDGER_FILE)))
}

fn build_engine(
    snapshot: LedgerSnapshot,
    owners: &[PrincipalId],
    tokens: &BTreeMap<AssetId, Arc<InMemoryTokenConnector>>,
    journal: &Arc<JournalSink>,
) -> Result<EscrowEngine, WorkspaceError> {
    let mut registry = ConnectorRegistry::new();
    for token in tokens.values() {
        registry.register(token.clone());
    }
    let authority = owners
        .iter()
        .cloned()
        .fold(OwnerAuthority::default(), OwnerAuthority::with_owner);

    Ok(EscrowEngine::restore(snapshot, registry, Arc::new(authority))?
        .with_sink(journal.clone())
        .with_sink(Arc::new(TracingSink)))
}
