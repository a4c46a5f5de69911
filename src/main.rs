// finsync - operator CLI
// Link accounts, run syncs and inspect local state without the HTTP server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use finsync::{
    get_account, get_transactions, insert_account, list_accounts, AppConfig, CursorStore,
    Database, LinkedAccount, PlaidClient, Reconciler, Resolution, SyncOrchestrator, TokenCipher,
};

#[derive(Parser)]
#[command(name = "finsync", version, about = "Incremental bank-transaction sync")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an account whose access token was already exchanged
    Link {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        institution_id: String,
        #[arg(long)]
        item_id: String,
        /// Bank account within the item (Plaid account_id)
        #[arg(long)]
        provider_account_id: String,
        #[arg(long)]
        access_token: String,
    },
    /// Sync one account, or every syncable account with --all
    Sync {
        account_id: Option<String>,
        #[arg(long, conflicts_with = "account_id")]
        all: bool,
    },
    /// List linked accounts
    Accounts,
    /// List an account's transactions
    Transactions {
        account_id: String,
        #[arg(long)]
        include_removed: bool,
    },
    /// List sync conflicts for an account
    Conflicts {
        account_id: String,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
    },
    /// Resolve a sync conflict
    Resolve {
        conflict_id: String,
        #[arg(value_enum)]
        resolution: ResolutionArg,
    },
    /// Forget the stored cursor; the next sync starts from scratch
    ResetCursor { account_id: String },
    /// Print a new key for FINSYNC_TOKEN_KEY
    GenKey,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    KeepLocal,
    AcceptUpstream,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::KeepLocal => Resolution::KeepLocal,
            ResolutionArg::AcceptUpstream => Resolution::AcceptUpstream,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Command::GenKey = cli.command {
        println!("{}", TokenCipher::generate_key());
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path.display());

    match cli.command {
        Command::Link {
            user_id,
            institution_id,
            item_id,
            provider_account_id,
            access_token,
        } => {
            let sealed = config.token_cipher()?.seal(&access_token)?;
            let account = LinkedAccount::new(
                &user_id,
                &institution_id,
                &item_id,
                &provider_account_id,
                sealed,
            );
            db.with_conn(|conn| insert_account(conn, &account))?;
            println!("🔗 Linked account {}", account.id);
        }
        Command::Sync { account_id, all } => {
            let orchestrator = build_orchestrator(&config, db.clone())?;
            let targets = match (account_id, all) {
                (Some(id), _) => vec![id],
                (None, true) => db
                    .with_conn(|conn| list_accounts(conn))?
                    .into_iter()
                    .filter(|account| account.is_syncable())
                    .map(|account| account.id)
                    .collect(),
                (None, false) => bail!("Pass an account id or --all"),
            };

            let policy = orchestrator.retry_policy();
            let mut failures = 0;
            for id in &targets {
                match orchestrator.sync_account_with_retry(id, &policy).await {
                    Ok(result) => println!("✅ {}: {}", id, result.summary()),
                    Err(e) => {
                        failures += 1;
                        eprintln!("❌ {}: [{}] {}", id, e.code(), e);
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} sync(s) failed", failures, targets.len());
            }
        }
        Command::Accounts => {
            let accounts = db.with_conn(|conn| list_accounts(conn))?;
            println!("📋 {} linked account(s)", accounts.len());
            for account in accounts {
                println!(
                    "  {}  user={}  item={}/{}  status={}  cursor={}  last_sync={}",
                    account.id,
                    account.user_id,
                    account.item_id,
                    account.provider_account_id,
                    account.status,
                    account.cursor.as_deref().unwrap_or("-"),
                    account
                        .last_synced_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
        }
        Command::Transactions {
            account_id,
            include_removed,
        } => {
            db.with_conn(|conn| get_account(conn, &account_id))?
                .with_context(|| format!("Unknown account: {}", account_id))?;
            let transactions =
                db.with_conn(|conn| get_transactions(conn, &account_id, include_removed))?;

            println!("📊 {} transaction(s)", transactions.len());
            for tx in transactions {
                println!(
                    "  {}  {}  {:>10.2} {}  {:<30}  {}{}{}",
                    tx.date,
                    tx.transaction_id,
                    tx.amount,
                    tx.currency,
                    tx.name,
                    tx.category.join(" > "),
                    if tx.pending { "  [pending]" } else { "" },
                    if tx.is_live() { "" } else { "  [removed]" },
                );
            }
        }
        Command::Conflicts { account_id, all } => {
            let conflicts = Reconciler::new(db).list_conflicts(&account_id, !all)?;
            println!("⚠️  {} conflict(s)", conflicts.len());
            for conflict in conflicts {
                println!(
                    "  {}  tx={}  {}: local={} upstream={}  ({})",
                    conflict.id,
                    conflict.transaction_id,
                    conflict.field,
                    conflict.local_value,
                    conflict.upstream_value,
                    conflict.resolution.as_str()
                );
            }
        }
        Command::Resolve {
            conflict_id,
            resolution,
        } => {
            let resolved = Reconciler::new(db)
                .resolve_conflict(&conflict_id, resolution.into())?
                .with_context(|| format!("Unknown conflict: {}", conflict_id))?;
            println!(
                "✓ Conflict {} is {}",
                resolved.id,
                resolved.resolution.as_str()
            );
        }
        Command::ResetCursor { account_id } => {
            CursorStore::new(db).reset_cursor(&account_id)?;
            println!("✓ Cursor reset for {}", account_id);
        }
        // Answered before the database is opened
        Command::GenKey => {}
    }

    Ok(())
}

fn build_orchestrator(config: &AppConfig, db: Database) -> Result<SyncOrchestrator> {
    if !config.plaid.has_credentials() {
        bail!("Plaid credentials missing: set PLAID_CLIENT_ID and PLAID_SECRET");
    }
    let tokens = config.token_cipher()?;
    let client = PlaidClient::new(&config.plaid, config.sync.page_size, tokens)
        .context("Failed to create Plaid client")?;
    Ok(SyncOrchestrator::new(
        db,
        Arc::new(client),
        config.sync.clone(),
    ))
}
