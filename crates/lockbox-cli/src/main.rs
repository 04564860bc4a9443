use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use lockbox_cli::Workspace;
use lockbox_core::{EscrowConfig, RemovalPolicy};
use lockbox_types::{Amount, EscrowError, LockTerm, PrincipalId, RecordHandle, ScopeId};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    ProjectStake,
    GenericLock,
    MultiToken,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RemovalArg {
    Tombstone,
    Compact,
}

impl From<RemovalArg> for RemovalPolicy {
    fn from(arg: RemovalArg) -> Self {
        match arg {
            RemovalArg::Tombstone => RemovalPolicy::Tombstone,
            RemovalArg::Compact => RemovalPolicy::Compact,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lockboxctl", version, about = "Lockbox time-locked escrow ledger")]
struct Cli {
    /// Directory holding the ledger and account state.
    #[arg(long, global = true, default_value = "lockbox-data", env = "LOCKBOX_STATE")]
    state: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new ledger
    Init {
        #[arg(long, value_enum, default_value_t = VariantArg::ProjectStake, env = "LOCKBOX_VARIANT")]
        variant: VariantArg,
        /// Asset of single-asset ledgers
        #[arg(long, default_value = "LBX", env = "LOCKBOX_ASSET")]
        asset: String,
        /// Shortest accepted lock, in days
        #[arg(long, default_value_t = 30, env = "LOCKBOX_MIN_LOCK_DAYS")]
        min_lock_days: i64,
        /// Override the variant's default removal policy
        #[arg(long, value_enum)]
        removal_policy: Option<RemovalArg>,
        /// Principal allowed to change admission; repeatable
        #[arg(long = "owner", env = "LOCKBOX_OWNER", value_delimiter = ',')]
        owners: Vec<String>,
        /// Replace an existing ledger
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Credit simulated tokens to a principal
    Mint {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        asset: Option<String>,
    },
    /// Lock value until maturity
    Deposit {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        scope: String,
        #[arg(long)]
        amount: u64,
        /// Lock duration in days
        #[arg(long, conflicts_with = "until", required_unless_present = "until")]
        days: Option<i64>,
        /// Absolute maturity (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Withdraw a matured record
    Release {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        scope: String,
        /// Record handle as `index:generation`
        #[arg(long)]
        handle: RecordHandle,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Add a non-refundable contribution to a scope
    Contribute {
        #[arg(long)]
        contributor: String,
        #[arg(long)]
        scope: String,
        #[arg(long)]
        amount: u64,
    },
    /// Permit or forbid deposits into a scope
    Allow {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        scope: String,
        #[arg(long, default_value_t = false)]
        deny: bool,
    },
    /// Show scope totals
    Stats {
        #[arg(long)]
        scope: String,
    },
    /// List a principal's records in a scope
    Records {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        scope: String,
        /// Only records that can be released at `--now`
        #[arg(long, default_value_t = false)]
        releasable: bool,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Show a principal's token balance
    Balance {
        #[arg(long)]
        holder: String,
        #[arg(long)]
        asset: Option<String>,
    },
    /// Compare ledger totals with custodied balances
    Reconcile,
    /// Print the event journal
    Journal {
        /// Only print whether the hash chain verifies
        #[arg(long, default_value_t = false)]
        verify: bool,
    },
}

fn escrow_config(
    variant: VariantArg,
    asset: String,
    min_lock_days: i64,
    removal_policy: Option<RemovalArg>,
) -> Result<EscrowConfig, EscrowError> {
    let minimum = Duration::try_days(min_lock_days).ok_or_else(|| {
        EscrowError::InvalidTerm(format!("minimum lock of {min_lock_days} days is out of range"))
    })?;
    let config = match variant {
        VariantArg::ProjectStake => EscrowConfig::project_stake(asset),
        VariantArg::GenericLock => EscrowConfig::generic_lock(asset),
        VariantArg::MultiToken => EscrowConfig::multi_token(),
    }
    .with_minimum_lock(minimum);

    Ok(match removal_policy {
        Some(policy) => config.with_removal_policy(policy.into()),
        None => config,
    })
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lockbox_cli=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Command::Init {
            variant,
            asset,
            min_lock_days,
            removal_policy,
            owners,
            force,
        } => {
            let config = escrow_config(variant, asset, min_lock_days, removal_policy)?;
            let owners = owners.into_iter().map(PrincipalId::new).collect();
            let workspace = Workspace::init(&cli.state, config, owners, force).await?;
            return print_json(&json!({
                "state": workspace.dir(),
                "config": workspace.engine().config(),
            }));
        }
        command => command,
    };

    let mut workspace = Workspace::open(&cli.state).await?;
    let output = match command {
        Command::Init { .. } => anyhow::bail!("ledger at {} is already open", cli.state.display()),
        Command::Mint { to, amount, asset } => {
            let asset = workspace.resolve_asset(asset.as_deref())?;
            let holder = PrincipalId::new(to.as_str());
            let balance = workspace.mint(&asset, &holder, Amount::new(amount))?;
            json!({ "asset": asset, "holder": to, "balance": balance })
        }
        Command::Deposit {
            principal,
            scope,
            amount,
            days,
            until,
            now,
        } => {
            let term = match (days, until) {
                (_, Some(until)) => LockTerm::Until(until),
                (Some(days), None) => LockTerm::try_days(days)?,
                (None, None) => anyhow::bail!("either --days or --until is required"),
            };
            let handle = workspace.engine().deposit(
                &PrincipalId::new(principal),
                &ScopeId::new(scope),
                Amount::new(amount),
                term,
                now.unwrap_or_else(Utc::now),
            )?;
            json!({ "handle": handle.to_string() })
        }
        Command::Release {
            principal,
            scope,
            handle,
            now,
        } => {
            let amount = workspace.engine().release(
                &PrincipalId::new(principal),
                &ScopeId::new(scope),
                handle,
                now.unwrap_or_else(Utc::now),
            )?;
            json!({ "handle": handle.to_string(), "released": amount })
        }
        Command::Contribute {
            contributor,
            scope,
            amount,
        } => {
            let totals = workspace.engine().contribute(
                &PrincipalId::new(contributor),
                &ScopeId::new(scope),
                Amount::new(amount),
            )?;
            json!(totals)
        }
        Command::Allow { actor, scope, deny } => {
            let scope = ScopeId::new(scope);
            workspace
                .engine()
                .set_allowed(&PrincipalId::new(actor), &scope, !deny)?;
            json!({ "scope": scope, "allowed": workspace.engine().is_allowed(&scope)? })
        }
        Command::Stats { scope } => {
            let scope = ScopeId::new(scope);
            json!({
                "scope": scope,
                "totals": workspace.engine().scope_stats(&scope)?,
                "allowed": workspace.engine().is_allowed(&scope)?,
                "halted": workspace.engine().is_halted(&scope)?,
            })
        }
        Command::Records {
            principal,
            scope,
            releasable,
            now,
        } => {
            let principal = PrincipalId::new(principal);
            let scope = ScopeId::new(scope);
            let now = now.unwrap_or_else(Utc::now);
            let entries = if releasable {
                workspace.engine().releasable(&principal, &scope, now)?
            } else {
                workspace.engine().list_entries(&principal, &scope)?
            };
            let records: Vec<_> = entries
                .into_iter()
                .map(|(handle, record)| {
                    json!({
                        "handle": handle.to_string(),
                        "state": record.state(now),
                        "record": record,
                    })
                })
                .collect();
            json!({
                "principal": principal,
                "scope": scope,
                "total_locked": workspace.engine().ledger_total(&principal, &scope)?,
                "records": records,
            })
        }
        Command::Balance { holder, asset } => {
            let asset = workspace.resolve_asset(asset.as_deref())?;
            json!({
                "asset": asset,
                "holder": holder,
                "balance": workspace.balance_of(&asset, &PrincipalId::new(holder.as_str()))?,
                "custody": workspace.custody_of(&asset)?,
            })
        }
        Command::Reconcile => {
            let report = workspace.engine().reconcile()?;
            json!({ "consistent": report.is_consistent(), "report": report })
        }
        Command::Journal { verify } => {
            let journal = workspace.journal()?;
            if verify {
                json!({ "entries": journal.len(), "verified": journal.verify_chain() })
            } else {
                json!(journal.entries())
            }
        }
    };

    workspace.save().await?;
    info!(state = %cli.state.display(), "Ledger state saved");
    print_json(&output)
}
