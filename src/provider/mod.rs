//! Upstream transaction provider capability.
//!
//! The orchestrator only ever talks to a [`TransactionProvider`]; Plaid is one
//! implementation, tests substitute a scripted one.

pub mod plaid;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::LinkedAccount;

/// Added or modified transaction as described by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTransaction {
    pub transaction_id: String,
    /// Bank account within the item that owns the transaction
    pub provider_account_id: String,
    pub amount: f64,
    pub currency: String,
    pub date: NaiveDate,
    pub name: String,
    pub category: Vec<String>,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedTransaction {
    pub transaction_id: String,
    /// Not every provider reports the owner of a removal
    pub provider_account_id: Option<String>,
}

/// One page of the provider's change stream, covering every account of an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPage {
    pub added: Vec<UpstreamTransaction>,
    pub modified: Vec<UpstreamTransaction>,
    pub removed: Vec<RemovedTransaction>,
    pub has_more: bool,
    pub next_cursor: String,
}

impl SyncPage {
    /// Drop entries owned by other bank accounts of the same item.
    /// Removals without an owner are kept; the reconciler skips ids it never stored.
    pub fn retain_account(&mut self, provider_account_id: &str) {
        self.added
            .retain(|tx| tx.provider_account_id == provider_account_id);
        self.modified
            .retain(|tx| tx.provider_account_id == provider_account_id);
        self.removed.retain(|tx| {
            tx.provider_account_id
                .as_deref()
                .map_or(true, |owner| owner == provider_account_id)
        });
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network failure, timeout or upstream 5xx
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("cursor invalid or expired: {0}")]
    CursorInvalid(String),

    /// Upstream data changed while paginating; restart from the first cursor
    #[error("data mutated during pagination")]
    MutationDuringPagination,

    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Fetch the page of changes following `cursor` (None = from the beginning)
    async fn fetch_next_page(
        &self,
        account: &LinkedAccount,
        cursor: Option<&str>,
    ) -> Result<SyncPage, ProviderError>;
}
