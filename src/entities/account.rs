// 💳 Linked Account Entity - One external bank/brokerage account linked by a user
//
// "Account UUID is IDENTITY (never changes), cursor and status are STATE"
//
// - Created on successful link (token exchange happens upstream of this crate)
// - Cursor is written only by the sync path, through the cursor store
// - Destroyed on unlink together with its transactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::vault::SealedToken;

// ============================================================================
// ACCOUNT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Syncing normally
    Active,

    /// Last sync was rejected upstream (e.g. login required)
    Error,

    /// User revoked access or the account was unlinked upstream
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Error => "error",
            AccountStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "error" => Ok(AccountStatus::Error),
            "disconnected" => Ok(AccountStatus::Disconnected),
            other => Err(format!("Unknown account status: {}", other)),
        }
    }
}

// ============================================================================
// LINKED ACCOUNT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    /// Stable identity (UUID)
    pub id: String,

    /// Owning user (user management is external)
    pub user_id: String,

    /// Upstream institution reference (e.g. "ins_109508")
    pub institution_id: String,

    /// Upstream item the account belongs to; webhooks are routed by it
    pub item_id: String,

    /// Bank account within the item. The item's change stream covers every
    /// account under one login, so sync keeps only rows carrying this id.
    pub provider_account_id: String,

    /// Sealed provider access token, never serialized to API responses
    #[serde(skip)]
    pub access_token: SealedToken,

    /// Last acknowledged sync cursor (None before the first sync)
    pub cursor: Option<String>,

    pub last_synced_at: Option<DateTime<Utc>>,

    pub status: AccountStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl LinkedAccount {
    /// Create a freshly linked account with a new UUID
    pub fn new(
        user_id: &str,
        institution_id: &str,
        item_id: &str,
        provider_account_id: &str,
        access_token: SealedToken,
    ) -> Self {
        LinkedAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            institution_id: institution_id.to_string(),
            item_id: item_id.to_string(),
            provider_account_id: provider_account_id.to_string(),
            access_token,
            cursor: None,
            last_synced_at: None,
            status: AccountStatus::Active,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Disconnected accounts are never synced; errored accounts may retry
    pub fn is_syncable(&self) -> bool {
        self.status != AccountStatus::Disconnected
    }

    /// True once a cursor has been acknowledged
    pub fn has_synced(&self) -> bool {
        self.cursor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::sealed;

    #[test]
    fn test_new_account_is_active_without_cursor() {
        let account =
            LinkedAccount::new("user-1", "ins_1", "item-1", "acc-1", sealed("access-sandbox-1"));

        assert!(!account.id.is_empty());
        assert_eq!(account.status, AccountStatus::Active);
        assert!(account.cursor.is_none());
        assert!(account.last_synced_at.is_none());
        assert!(!account.has_synced());
        assert!(account.is_syncable());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [AccountStatus::Active, AccountStatus::Error, AccountStatus::Disconnected] {
            assert_eq!(status.as_str().parse::<AccountStatus>().unwrap(), status);
        }
        assert!("closed".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_disconnected_is_not_syncable() {
        let mut account =
            LinkedAccount::new("user-1", "ins_1", "item-1", "acc-1", sealed("token"));
        account.status = AccountStatus::Error;
        assert!(account.is_syncable());

        account.status = AccountStatus::Disconnected;
        assert!(!account.is_syncable());
    }

    #[test]
    fn test_access_token_not_serialized() {
        let account =
            LinkedAccount::new("user-1", "ins_1", "item-1", "acc-1", sealed("secret-token"));
        let json = serde_json::to_string(&account).unwrap();

        assert!(!json.contains("access_token"));
        assert!(!json.contains(account.access_token.as_str()));
        assert!(json.contains("\"provider_account_id\":\"acc-1\""));
        assert!(json.contains("\"status\":\"active\""));
    }
}
