// 🧾 Transaction Entity - A provider-assigned financial transaction
//
// Identity: (account_id, transaction_id), assigned upstream, unique per account.
// User-editable fields: category, name. Everything else belongs to the provider.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Provider transaction identifier
    pub transaction_id: String,

    /// Owning linked account
    pub account_id: String,

    /// Positive = money out, negative = money in (provider convention)
    pub amount: f64,

    /// ISO 4217 code
    pub currency: String,

    pub date: NaiveDate,

    pub name: String,

    /// Ordered from general to specific, e.g. ["Food and Drink", "Coffee Shop"]
    pub category: Vec<String>,

    pub pending: bool,

    /// Set once the user edits category or name; upstream may no longer overwrite them
    pub local_edit: bool,

    /// Soft-delete flag (removed upstream, kept for audit)
    pub removed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-initiated change to the editable fields of a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionEdit {
    #[serde(default)]
    pub category: Option<Vec<String>>,

    #[serde(default)]
    pub name: Option<String>,
}

impl TransactionEdit {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.name.is_none()
    }
}

impl Transaction {
    /// Not soft-deleted
    pub fn is_live(&self) -> bool {
        !self.removed
    }

    /// Most general category, if any
    pub fn primary_category(&self) -> Option<&str> {
        self.category.first().map(|c| c.as_str())
    }

    /// Apply a user edit and mark the transaction as locally edited
    pub fn apply_edit(&mut self, edit: &TransactionEdit) {
        if let Some(category) = &edit.category {
            self.category = category.clone();
        }
        if let Some(name) = &edit.name {
            self.name = name.clone();
        }
        if !edit.is_empty() {
            self.local_edit = true;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_transaction() -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: "tx-1".to_string(),
            account_id: "acc-1".to_string(),
            amount: 4.33,
            currency: "USD".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            name: "Starbucks".to_string(),
            category: vec!["Food and Drink".to_string(), "Coffee Shop".to_string()],
            pending: false,
            local_edit: false,
            removed: false,
            removed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_apply_edit_sets_local_edit_flag() {
        let mut tx = create_test_transaction();

        tx.apply_edit(&TransactionEdit {
            category: Some(vec!["Business".to_string()]),
            name: None,
        });

        assert!(tx.local_edit);
        assert_eq!(tx.primary_category(), Some("Business"));
        assert_eq!(tx.name, "Starbucks");
    }

    #[test]
    fn test_empty_edit_is_noop() {
        let mut tx = create_test_transaction();
        tx.apply_edit(&TransactionEdit::default());

        assert!(!tx.local_edit);
        assert_eq!(tx.primary_category(), Some("Food and Drink"));
    }
}
