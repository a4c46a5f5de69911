// finsync - Core Library
// Incremental bank-transaction sync: cursor store, orchestrator, reconciler,
// sealed access tokens.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod config;
pub mod cursor_store;
pub mod db;
pub mod entities;
pub mod error;
pub mod locks;
pub mod provider;
pub mod reconciler;
pub mod sync;
pub mod vault;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{AppConfig, PlaidConfig, PlaidEnvironment, RetrySettings, SyncSettings};
pub use cursor_store::CursorStore;
pub use db::{
    delete_account, edit_transaction, find_accounts_by_item, get_account, get_events_for_entity,
    get_transaction, get_transactions, insert_account, insert_event, list_accounts,
    setup_database, update_account_status, Database, Event,
};
pub use entities::{AccountStatus, LinkedAccount, Transaction, TransactionEdit};
pub use error::SyncError;
pub use locks::{AccountLocks, LeaseGuard};
pub use provider::plaid::PlaidClient;
pub use provider::{
    ProviderError, RemovedTransaction, SyncPage, TransactionProvider, UpstreamTransaction,
};
pub use reconciler::{ConflictState, ReconcileReport, Reconciler, Resolution, SyncConflict};
pub use sync::{CancelToken, RetryPolicy, SyncOrchestrator, SyncResult};
pub use vault::{SealedToken, TokenCipher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
