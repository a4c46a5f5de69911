// Sync error taxonomy
// Every outcome the sync path can surface to a caller is one of these variants.

use thiserror::Error;

use crate::entities::AccountStatus;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync for this account holds the lease
    #[error("sync already in progress for account {account_id}")]
    SyncInProgress { account_id: String },

    /// Rate limit, timeout, network or upstream 5xx. Cursor was not advanced.
    #[error("transient sync error: {0}")]
    TransientSyncError(String),

    /// Upstream rejected the cursor; the stored cursor was reset to null
    #[error("cursor invalidated for account {account_id}, full resync required")]
    CursorInvalidated { account_id: String },

    /// Local storage failed; no partial state change was made
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account {account_id} is {status}")]
    AccountUnavailable {
        account_id: String,
        status: AccountStatus,
    },

    /// Permanent upstream rejection (e.g. ITEM_LOGIN_REQUIRED)
    #[error("upstream rejected request: {code}: {message}")]
    UpstreamRejected { code: String, message: String },

    #[error("sync cancelled for account {account_id}")]
    Cancelled { account_id: String },
}

impl SyncError {
    /// Wrap a storage-layer failure
    pub fn storage(err: anyhow::Error) -> Self {
        SyncError::StorageUnavailable(format!("{:#}", err))
    }

    /// Only transient failures are worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientSyncError(_))
    }

    /// Stable machine-readable code used by the HTTP surface
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::SyncInProgress { .. } => "SYNC_IN_PROGRESS",
            SyncError::TransientSyncError(_) => "TRANSIENT_SYNC_ERROR",
            SyncError::CursorInvalidated { .. } => "CURSOR_INVALIDATED",
            SyncError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            SyncError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            SyncError::AccountUnavailable { .. } => "ACCOUNT_UNAVAILABLE",
            SyncError::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            SyncError::Cancelled { .. } => "CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SyncError::TransientSyncError("429".into()).is_retryable());
        assert!(!SyncError::SyncInProgress { account_id: "a".into() }.is_retryable());
        assert!(!SyncError::CursorInvalidated { account_id: "a".into() }.is_retryable());
        assert!(!SyncError::StorageUnavailable("disk".into()).is_retryable());
    }

    #[test]
    fn test_storage_wraps_context_chain() {
        let err = anyhow::anyhow!("disk I/O error").context("Failed to set cursor");
        let sync_err = SyncError::storage(err);

        assert_eq!(sync_err.code(), "STORAGE_UNAVAILABLE");
        let message = sync_err.to_string();
        assert!(message.contains("Failed to set cursor"));
        assert!(message.contains("disk I/O error"));
    }

    #[test]
    fn test_account_unavailable_message() {
        let err = SyncError::AccountUnavailable {
            account_id: "acc-1".into(),
            status: AccountStatus::Disconnected,
        };
        assert_eq!(err.to_string(), "account acc-1 is disconnected");
    }
}
