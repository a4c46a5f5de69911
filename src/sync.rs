// 🔄 Sync Orchestrator - Page through upstream changes for one account
//
// Flow per run:
//   lease -> load account -> load cursor -> fetch pages until has_more=false
//   -> reconcile (one commit) -> persist cursor -> mark synced
//
// The cursor is written only after the reconciler committed. A crash between
// the two re-fetches the same pages next time, and the reconciler treats
// them as duplicates.

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RetrySettings, SyncSettings};
use crate::cursor_store::CursorStore;
use crate::db::{get_account, mark_synced, update_account_status, Database};
use crate::entities::{AccountStatus, LinkedAccount};
use crate::error::SyncError;
use crate::locks::{AccountLocks, LeaseGuard};
use crate::provider::{ProviderError, SyncPage, TransactionProvider, UpstreamTransaction};
use crate::reconciler::Reconciler;

// ============================================================================
// SYNC RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub account_id: String,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub next_cursor: Option<String>,
    pub pages: usize,
    pub conflicts: usize,
}

impl SyncResult {
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} modified, {} removed over {} page(s), {} conflict(s)",
            self.added, self.modified, self.removed, self.pages, self.conflicts
        )
    }
}

// ============================================================================
// CANCELLATION & RETRY
// ============================================================================

/// Checked before every page fetch; reconciliation is never interrupted
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): initial * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

// ============================================================================
// PAGE ACCUMULATION
// ============================================================================

/// Final state per transaction id across every page of one run
#[derive(Debug, Default)]
struct ChangeSet {
    added: BTreeMap<String, UpstreamTransaction>,
    modified: BTreeMap<String, UpstreamTransaction>,
    removed: BTreeSet<String>,
}

impl ChangeSet {
    fn fold(&mut self, page: SyncPage) {
        for tx in page.added {
            self.removed.remove(&tx.transaction_id);
            self.modified.remove(&tx.transaction_id);
            self.added.insert(tx.transaction_id.clone(), tx);
        }

        for tx in page.modified {
            self.removed.remove(&tx.transaction_id);
            if let Some(pending_insert) = self.added.get_mut(&tx.transaction_id) {
                *pending_insert = tx;
            } else {
                self.modified.insert(tx.transaction_id.clone(), tx);
            }
        }

        for removed in page.removed {
            let id = removed.transaction_id;
            self.added.remove(&id);
            self.modified.remove(&id);
            self.removed.insert(id);
        }
    }

    fn into_parts(self) -> (Vec<UpstreamTransaction>, Vec<UpstreamTransaction>, Vec<String>) {
        (
            self.added.into_values().collect(),
            self.modified.into_values().collect(),
            self.removed.into_iter().collect(),
        )
    }
}

struct Fetched {
    changes: ChangeSet,
    cursor: Option<String>,
    pages: usize,
}

enum FetchError {
    Provider(ProviderError),
    TimedOut { page: usize },
    Cancelled,
    LeaseLost,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct SyncOrchestrator {
    db: Database,
    cursors: CursorStore,
    reconciler: Reconciler,
    provider: Arc<dyn TransactionProvider>,
    locks: AccountLocks,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(db: Database, provider: Arc<dyn TransactionProvider>, settings: SyncSettings) -> Self {
        SyncOrchestrator {
            cursors: CursorStore::new(db.clone()),
            reconciler: Reconciler::new(db.clone()),
            locks: AccountLocks::new(settings.lease_ttl()),
            db,
            provider,
            settings,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.settings.retry)
    }

    pub async fn sync_account(&self, account_id: &str) -> Result<SyncResult, SyncError> {
        self.sync_account_cancellable(account_id, &CancelToken::new())
            .await
    }

    pub async fn sync_account_cancellable(
        &self,
        account_id: &str,
        cancel: &CancelToken,
    ) -> Result<SyncResult, SyncError> {
        let lease = self.locks.try_acquire(account_id)?;
        info!("🔄 Sync started for account {}", account_id);

        let result = self.run(&lease, cancel).await;
        match &result {
            Ok(summary) => info!("✅ Sync for {}: {}", account_id, summary.summary()),
            Err(e) => warn!("❌ Sync for {} failed [{}]: {}", account_id, e.code(), e),
        }
        result
    }

    /// Retry transient failures with exponential backoff; anything else returns at once
    pub async fn sync_account_with_retry(
        &self,
        account_id: &str,
        policy: &RetryPolicy,
    ) -> Result<SyncResult, SyncError> {
        let mut attempt = 1;
        loop {
            match self.sync_account(account_id).await {
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "Sync for {} failed, retrying in {:?} (attempt {}/{}): {}",
                        account_id, delay, attempt, policy.max_attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn run(&self, lease: &LeaseGuard, cancel: &CancelToken) -> Result<SyncResult, SyncError> {
        let account_id = lease.account_id();

        let account = self
            .db
            .with_conn(|conn| get_account(conn, account_id))
            .map_err(SyncError::storage)?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;

        if !account.is_syncable() {
            return Err(SyncError::AccountUnavailable {
                account_id: account.id.clone(),
                status: account.status,
            });
        }

        let start_cursor = self
            .cursors
            .get_cursor(account_id)
            .map_err(SyncError::storage)?;

        let mut restarts = 0;
        let fetched = loop {
            match self
                .fetch_all(&account, lease, start_cursor.as_deref(), cancel)
                .await
            {
                Ok(fetched) => break fetched,
                Err(FetchError::Provider(ProviderError::MutationDuringPagination))
                    if restarts < self.settings.max_pagination_restarts =>
                {
                    restarts += 1;
                    warn!(
                        "Upstream data changed during pagination for {}, restarting ({}/{})",
                        account_id, restarts, self.settings.max_pagination_restarts
                    );
                }
                Err(e) => return Err(self.fail(&account, e)),
            }
        };

        if !lease.renew() {
            return Err(SyncError::SyncInProgress {
                account_id: account_id.to_string(),
            });
        }

        let Fetched {
            changes,
            cursor,
            pages,
        } = fetched;
        let (added, modified, removed) = changes.into_parts();

        let report = self
            .reconciler
            .apply_changes(account_id, &added, &modified, &removed)
            .map_err(SyncError::storage)?;
        debug!("Reconciled {}: {}", account_id, report.summary());

        if let Some(cursor) = &cursor {
            self.cursors
                .set_cursor(account_id, cursor)
                .map_err(SyncError::storage)?;
        }

        self.db
            .with_conn(|conn| mark_synced(conn, account_id, Utc::now()))
            .map_err(SyncError::storage)?;

        Ok(SyncResult {
            account_id: account_id.to_string(),
            added: added.len(),
            modified: modified.len(),
            removed: removed.len(),
            next_cursor: cursor,
            pages,
            conflicts: report.conflicts,
        })
    }

    async fn fetch_all(
        &self,
        account: &LinkedAccount,
        lease: &LeaseGuard,
        start_cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Fetched, FetchError> {
        let mut changes = ChangeSet::default();
        let mut cursor = start_cursor.map(|c| c.to_string());
        let mut pages = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if !lease.renew() {
                return Err(FetchError::LeaseLost);
            }

            let mut page = tokio::time::timeout(
                self.settings.page_timeout(),
                self.provider.fetch_next_page(account, cursor.as_deref()),
            )
            .await
            .map_err(|_| FetchError::TimedOut { page: pages + 1 })?
            .map_err(FetchError::Provider)?;

            pages += 1;
            page.retain_account(&account.provider_account_id);
            debug!(
                "Page {} for {}: +{} ~{} -{} (has_more={})",
                pages,
                account.id,
                page.added.len(),
                page.modified.len(),
                page.removed.len(),
                page.has_more
            );

            let has_more = page.has_more;
            if !page.next_cursor.is_empty() {
                cursor = Some(page.next_cursor.clone());
            }
            changes.fold(page);

            if !has_more {
                return Ok(Fetched {
                    changes,
                    cursor,
                    pages,
                });
            }
        }
    }

    /// Map a failed fetch onto the error taxonomy, applying its side effects
    fn fail(&self, account: &LinkedAccount, error: FetchError) -> SyncError {
        let account_id = account.id.clone();
        match error {
            FetchError::Cancelled => SyncError::Cancelled { account_id },
            FetchError::LeaseLost => SyncError::SyncInProgress { account_id },
            FetchError::TimedOut { page } => SyncError::TransientSyncError(format!(
                "page {} timed out after {:?}",
                page,
                self.settings.page_timeout()
            )),
            FetchError::Provider(ProviderError::RateLimited(msg)) => {
                SyncError::TransientSyncError(format!("rate limited: {}", msg))
            }
            FetchError::Provider(ProviderError::Unavailable(msg)) => {
                SyncError::TransientSyncError(msg)
            }
            FetchError::Provider(ProviderError::MutationDuringPagination) => {
                SyncError::TransientSyncError(format!(
                    "upstream kept changing after {} pagination restarts",
                    self.settings.max_pagination_restarts
                ))
            }
            FetchError::Provider(ProviderError::CursorInvalid(msg)) => {
                warn!("Cursor for {} rejected ({}), resetting", account_id, msg);
                match self.cursors.reset_cursor(&account_id) {
                    Ok(()) => SyncError::CursorInvalidated { account_id },
                    Err(e) => SyncError::storage(e),
                }
            }
            FetchError::Provider(ProviderError::Rejected { code, message }) => {
                let last_error = format!("{}: {}", code, message);
                let marked = self.db.with_conn(|conn| {
                    update_account_status(conn, &account_id, AccountStatus::Error, Some(&last_error))
                });
                match marked {
                    Ok(_) => SyncError::UpstreamRejected { code, message },
                    Err(e) => SyncError::storage(e),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
