//! Plaid `/transactions/sync` client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    ProviderError, RemovedTransaction, SyncPage, TransactionProvider, UpstreamTransaction,
};
use crate::config::PlaidConfig;
use crate::entities::LinkedAccount;
use crate::vault::TokenCipher;

const SYNC_PATH: &str = "/transactions/sync";
const DEFAULT_CURRENCY: &str = "USD";

/// HTTP client for the Plaid transactions API
#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
    page_size: u32,
    tokens: TokenCipher,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<PlaidTransaction>,
    #[serde(default)]
    modified: Vec<PlaidTransaction>,
    #[serde(default)]
    removed: Vec<PlaidRemovedTransaction>,
    has_more: bool,
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct PlaidTransaction {
    transaction_id: String,
    account_id: String,
    amount: f64,
    iso_currency_code: Option<String>,
    unofficial_currency_code: Option<String>,
    date: NaiveDate,
    name: Option<String>,
    merchant_name: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
    #[serde(default)]
    personal_finance_category: Option<PersonalFinanceCategory>,
    #[serde(default)]
    pending: bool,
}

#[derive(Debug, Deserialize)]
struct PersonalFinanceCategory {
    primary: String,
    detailed: String,
}

#[derive(Debug, Deserialize)]
struct PlaidRemovedTransaction {
    transaction_id: String,
    #[serde(default)]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl From<PlaidTransaction> for UpstreamTransaction {
    fn from(tx: PlaidTransaction) -> Self {
        // Legacy category hierarchy first, personal finance category as fallback
        let category = match (tx.category, tx.personal_finance_category) {
            (Some(category), _) if !category.is_empty() => category,
            (_, Some(pfc)) => vec![pfc.primary, pfc.detailed],
            _ => Vec::new(),
        };

        UpstreamTransaction {
            transaction_id: tx.transaction_id,
            provider_account_id: tx.account_id,
            amount: tx.amount,
            currency: tx
                .iso_currency_code
                .or(tx.unofficial_currency_code)
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            date: tx.date,
            name: tx.name.or(tx.merchant_name).unwrap_or_default(),
            category,
            pending: tx.pending,
        }
    }
}

impl From<SyncResponse> for SyncPage {
    fn from(response: SyncResponse) -> Self {
        SyncPage {
            added: response.added.into_iter().map(Into::into).collect(),
            modified: response.modified.into_iter().map(Into::into).collect(),
            removed: response
                .removed
                .into_iter()
                .map(|r| RemovedTransaction {
                    transaction_id: r.transaction_id,
                    provider_account_id: r.account_id,
                })
                .collect(),
            has_more: response.has_more,
            next_cursor: response.next_cursor,
        }
    }
}

impl PlaidClient {
    pub fn new(config: &PlaidConfig, page_size: u32, tokens: TokenCipher) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("finsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(PlaidClient {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
            page_size: page_size.clamp(1, 500),
            tokens,
        })
    }
}

#[async_trait]
impl TransactionProvider for PlaidClient {
    async fn fetch_next_page(
        &self,
        account: &LinkedAccount,
        cursor: Option<&str>,
    ) -> Result<SyncPage, ProviderError> {
        let url = format!("{}{}", self.base_url, SYNC_PATH);
        debug!("POST {} (account={}, cursor={:?})", url, account.id, cursor);

        let access_token = self
            .tokens
            .open(&account.access_token)
            .map_err(|e| ProviderError::Rejected {
                code: "ACCESS_TOKEN_UNREADABLE".to_string(),
                message: e.to_string(),
            })?;

        let request = SyncRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token: &access_token,
            cursor,
            count: self.page_size,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let error_body = serde_json::from_slice::<PlaidErrorBody>(&body).ok();
            return Err(classify_error(status, error_body));
        }

        let parsed: SyncResponse = serde_json::from_slice(&body).map_err(|e| {
            ProviderError::Unavailable(format!("Malformed sync response: {}", e))
        })?;

        Ok(parsed.into())
    }
}

/// Map a Plaid error response onto the provider error taxonomy
fn classify_error(status: StatusCode, body: Option<PlaidErrorBody>) -> ProviderError {
    let Some(body) = body else {
        return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::Unavailable(format!("HTTP {}", status))
        } else {
            ProviderError::Rejected {
                code: format!("HTTP_{}", status.as_u16()),
                message: status.to_string(),
            }
        };
    };

    match body.error_code.as_str() {
        "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION" => {
            return ProviderError::MutationDuringPagination
        }
        "INVALID_CURSOR" => return ProviderError::CursorInvalid(body.error_message),
        "INVALID_FIELD" if body.error_message.to_lowercase().contains("cursor") => {
            return ProviderError::CursorInvalid(body.error_message)
        }
        "PRODUCT_NOT_READY" | "INSTITUTION_DOWN" | "INSTITUTION_NOT_RESPONDING" => {
            return ProviderError::Unavailable(format!(
                "{}: {}",
                body.error_code, body.error_message
            ))
        }
        _ => {}
    }

    if body.error_type == "RATE_LIMIT_EXCEEDED" || status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited(body.error_message);
    }

    if body.error_type == "API_ERROR" || status.is_server_error() {
        return ProviderError::Unavailable(format!("{}: {}", body.error_code, body.error_message));
    }

    ProviderError::Rejected {
        code: body.error_code,
        message: body.error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{sealed, test_cipher};

    fn error_body(error_type: &str, error_code: &str, message: &str) -> Option<PlaidErrorBody> {
        Some(PlaidErrorBody {
            error_type: error_type.to_string(),
            error_code: error_code.to_string(),
            error_message: message.to_string(),
        })
    }

    #[test]
    fn test_parse_sync_response() {
        let json = r#"{
            "added": [{
                "transaction_id": "tx1",
                "account_id": "plaid-acc",
                "amount": 12.5,
                "iso_currency_code": "USD",
                "unofficial_currency_code": null,
                "date": "2025-01-02",
                "name": "Uber 063015 SF**POOL**",
                "merchant_name": "Uber",
                "category": ["Travel", "Taxi"],
                "pending": false
            }],
            "modified": [{
                "transaction_id": "tx2",
                "account_id": "plaid-acc",
                "amount": -500.0,
                "iso_currency_code": null,
                "unofficial_currency_code": "BTC",
                "date": "2025-01-03",
                "name": null,
                "merchant_name": "Coinbase",
                "category": null,
                "personal_finance_category": {"primary": "TRANSFER_IN", "detailed": "TRANSFER_IN_DEPOSIT"},
                "pending": true
            }],
            "removed": [{"transaction_id": "tx3"}],
            "has_more": true,
            "next_cursor": "cursor-123",
            "request_id": "req-1"
        }"#;

        let response: SyncResponse = serde_json::from_str(json).unwrap();
        let page: SyncPage = response.into();

        assert_eq!(page.added.len(), 1);
        assert_eq!(page.added[0].category, vec!["Travel", "Taxi"]);
        assert_eq!(page.added[0].name, "Uber 063015 SF**POOL**");
        assert_eq!(page.added[0].provider_account_id, "plaid-acc");

        assert_eq!(page.modified[0].currency, "BTC");
        assert_eq!(page.modified[0].name, "Coinbase");
        assert_eq!(
            page.modified[0].category,
            vec!["TRANSFER_IN", "TRANSFER_IN_DEPOSIT"]
        );
        assert!(page.modified[0].pending);

        assert_eq!(page.removed[0].transaction_id, "tx3");
        assert_eq!(page.removed[0].provider_account_id, None);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, "cursor-123");
    }

    #[test]
    fn test_item_page_splits_by_bank_account() {
        let json = r#"{
            "added": [
                {"transaction_id": "tA", "account_id": "plaid-checking", "amount": 10.0,
                 "iso_currency_code": "USD", "date": "2025-01-02", "name": "Coffee"},
                {"transaction_id": "tB", "account_id": "plaid-savings", "amount": -250.0,
                 "iso_currency_code": "USD", "date": "2025-01-02", "name": "Interest"}
            ],
            "modified": [],
            "removed": [
                {"transaction_id": "tC", "account_id": "plaid-savings"},
                {"transaction_id": "tD"}
            ],
            "has_more": false,
            "next_cursor": "c1"
        }"#;
        let response: SyncResponse = serde_json::from_str(json).unwrap();
        let page: SyncPage = response.into();

        let mut checking = page.clone();
        checking.retain_account("plaid-checking");
        let ids: Vec<&str> = checking.added.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["tA"]);
        let removed: Vec<&str> = checking
            .removed
            .iter()
            .map(|r| r.transaction_id.as_str())
            .collect();
        assert_eq!(removed, vec!["tD"]);

        let mut savings = page;
        savings.retain_account("plaid-savings");
        assert_eq!(savings.added.len(), 1);
        assert_eq!(savings.added[0].transaction_id, "tB");
        assert_eq!(savings.removed.len(), 2);
        assert_eq!(savings.next_cursor, "c1");
    }

    #[test]
    fn test_request_omits_null_cursor() {
        let request = SyncRequest {
            client_id: "id",
            secret: "secret",
            access_token: "access-sandbox",
            cursor: None,
            count: 100,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("cursor").is_none());
        assert_eq!(json["count"], 100);
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_error(
            StatusCode::TOO_MANY_REQUESTS,
            error_body("RATE_LIMIT_EXCEEDED", "TRANSACTIONS_SYNC_LIMIT", "slow down"),
        );
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[test]
    fn test_classify_mutation_during_pagination() {
        let err = classify_error(
            StatusCode::BAD_REQUEST,
            error_body(
                "TRANSACTIONS_ERROR",
                "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION",
                "restart",
            ),
        );
        assert!(matches!(err, ProviderError::MutationDuringPagination));
    }

    #[test]
    fn test_classify_invalid_cursor() {
        let err = classify_error(
            StatusCode::BAD_REQUEST,
            error_body("INVALID_REQUEST", "INVALID_FIELD", "cursor is not valid"),
        );
        assert!(matches!(err, ProviderError::CursorInvalid(_)));

        let other_field = classify_error(
            StatusCode::BAD_REQUEST,
            error_body("INVALID_REQUEST", "INVALID_FIELD", "count must be <= 500"),
        );
        assert!(matches!(other_field, ProviderError::Rejected { .. }));
    }

    #[test]
    fn test_classify_login_required_is_rejected() {
        let err = classify_error(
            StatusCode::BAD_REQUEST,
            error_body("ITEM_ERROR", "ITEM_LOGIN_REQUIRED", "User login required"),
        );
        match err {
            ProviderError::Rejected { code, .. } => assert_eq!(code, "ITEM_LOGIN_REQUIRED"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_errors() {
        let api_error = classify_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("API_ERROR", "INTERNAL_SERVER_ERROR", "oops"),
        );
        assert!(matches!(api_error, ProviderError::Unavailable(_)));

        let no_body = classify_error(StatusCode::BAD_GATEWAY, None);
        assert!(matches!(no_body, ProviderError::Unavailable(_)));

        let forbidden = classify_error(StatusCode::FORBIDDEN, None);
        assert!(matches!(forbidden, ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_token_is_rejected_before_request() {
        let client = PlaidClient::new(&PlaidConfig::default(), 100, test_cipher()).unwrap();
        let mut account = LinkedAccount::new("user-1", "ins_1", "item-1", "acc-1", sealed("t"));
        account.access_token = TokenCipher::new(&[1u8; 32]).seal("t").unwrap();

        let err = client.fetch_next_page(&account, None).await.unwrap_err();
        match err {
            ProviderError::Rejected { code, .. } => assert_eq!(code, "ACCESS_TOKEN_UNREADABLE"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_page_size_is_clamped() {
        let config = PlaidConfig::default();
        let client = PlaidClient::new(&config, 10_000, test_cipher()).unwrap();
        assert_eq!(client.page_size, 500);
        assert_eq!(client.base_url, "https://sandbox.plaid.com");
    }
}
