// 🌐 HTTP API - axum router over the sync orchestrator
//
// Every response uses the same envelope:
//   { "success": true,  "data": ... }
//   { "success": false, "error": { "code": "...", "message": "..." } }
// A successful sync also repeats added/modified/removed next to "data".

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{
    delete_account, edit_transaction, find_accounts_by_item, get_account, get_transactions,
    insert_account, update_account_status,
};
use crate::entities::{AccountStatus, LinkedAccount, Transaction, TransactionEdit};
use crate::error::SyncError;
use crate::reconciler::{Resolution, SyncConflict};
use crate::sync::{SyncOrchestrator, SyncResult};
use crate::vault::TokenCipher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Seals access tokens received on link
    pub tokens: TokenCipher,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, tokens: TokenCipher) -> Self {
        Self {
            orchestrator,
            tokens,
        }
    }
}

// ============================================================================
// Envelope & errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }
}

/// HTTP status for each sync outcome
pub fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::SyncInProgress { .. } => StatusCode::CONFLICT,
        SyncError::TransientSyncError(_) => StatusCode::BAD_GATEWAY,
        SyncError::CursorInvalidated { .. } => StatusCode::GONE,
        SyncError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::AccountUnavailable { .. } => StatusCode::CONFLICT,
        SyncError::UpstreamRejected { .. } => StatusCode::BAD_REQUEST,
        SyncError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::new(status_for(&err), err.code(), err.to_string())
    }
}

// Repository failures surface as storage outages, never as bare 500s
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Storage error: {:#}", err);
        SyncError::storage(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Request / response types
// ============================================================================

/// POST /accounts/:id/sync success body
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub data: SyncResult,
}

impl From<SyncResult> for SyncResponse {
    fn from(result: SyncResult) -> Self {
        SyncResponse {
            success: true,
            added: result.added,
            modified: result.modified,
            removed: result.removed,
            data: result,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkAccountRequest {
    pub user_id: String,
    pub institution_id: String,
    pub item_id: String,
    /// Bank account within the item (Plaid `account_id`)
    pub provider_account_id: String,
    pub access_token: String,
}

#[derive(Serialize, Deserialize)]
pub struct UnlinkResponse {
    pub account_id: String,
    pub unlinked: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    pub include_removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    #[serde(default = "default_pending_only")]
    pub pending_only: bool,
}

fn default_pending_only() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
}

/// Plaid webhook payload (only the fields routing needs)
#[derive(Debug, Deserialize)]
pub struct PlaidWebhook {
    pub webhook_type: String,
    pub webhook_code: String,
    pub item_id: String,
    #[serde(default)]
    pub error: Option<PlaidWebhookError>,
}

#[derive(Debug, Deserialize)]
pub struct PlaidWebhookError {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub action: String,
    pub accounts: Vec<String>,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(link_account))
        .route("/accounts/:id", get(get_account_handler).delete(unlink_account))
        .route("/accounts/:id/sync", post(sync_account))
        .route("/accounts/:id/transactions", get(list_transactions))
        .route("/accounts/:id/transactions/:tx_id", patch(edit_transaction_handler))
        .route("/accounts/:id/conflicts", get(list_conflicts))
        .route("/conflicts/:id/resolve", post(resolve_conflict))
        .route("/webhooks/plaid", post(plaid_webhook))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_check() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    }))
}

/// POST /accounts/:id/sync - safe to repeat; never advances past applied data
async fn sync_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<SyncResponse>, ApiError> {
    let result = state.orchestrator.sync_account(&account_id).await?;
    Ok(Json(result.into()))
}

/// POST /accounts - register an account after token exchange
async fn link_account(
    State(state): State<AppState>,
    Json(request): Json<LinkAccountRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LinkedAccount>>), ApiError> {
    let required = [
        ("user_id", &request.user_id),
        ("institution_id", &request.institution_id),
        ("item_id", &request.item_id),
        ("provider_account_id", &request.provider_account_id),
        ("access_token", &request.access_token),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(ApiError::bad_request(format!("{} is required", field)));
    }

    let access_token = state.tokens.seal(&request.access_token)?;
    let account = LinkedAccount::new(
        &request.user_id,
        &request.institution_id,
        &request.item_id,
        &request.provider_account_id,
        access_token,
    );
    state
        .orchestrator
        .database()
        .with_conn(|conn| insert_account(conn, &account))?;

    info!("🔗 Linked account {} (item {})", account.id, account.item_id);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(account))))
}

fn load_account(state: &AppState, account_id: &str) -> Result<LinkedAccount, ApiError> {
    state
        .orchestrator
        .database()
        .with_conn(|conn| get_account(conn, account_id))?
        .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()).into())
}

/// GET /accounts/:id
async fn get_account_handler(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<LinkedAccount> {
    let account = load_account(&state, &account_id)?;
    Ok(Json(ApiResponse::ok(account)))
}

/// DELETE /accounts/:id - drops the account with its transactions and conflicts
async fn unlink_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<UnlinkResponse> {
    let deleted = state
        .orchestrator
        .database()
        .with_conn(|conn| delete_account(conn, &account_id))?;

    if !deleted {
        return Err(SyncError::AccountNotFound(account_id).into());
    }

    info!("Unlinked account {}", account_id);
    Ok(Json(ApiResponse::ok(UnlinkResponse {
        account_id,
        unlinked: true,
    })))
}

/// GET /accounts/:id/transactions?include_removed=true
async fn list_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Vec<Transaction>> {
    load_account(&state, &account_id)?;
    let transactions = state
        .orchestrator
        .database()
        .with_conn(|conn| get_transactions(conn, &account_id, query.include_removed))?;
    Ok(Json(ApiResponse::ok(transactions)))
}

/// PATCH /accounts/:id/transactions/:tx_id - user edit, flags the row as locally edited
async fn edit_transaction_handler(
    State(state): State<AppState>,
    Path((account_id, transaction_id)): Path<(String, String)>,
    Json(edit): Json<TransactionEdit>,
) -> ApiResult<Transaction> {
    let edited = state
        .orchestrator
        .database()
        .with_conn(|conn| edit_transaction(conn, &account_id, &transaction_id, &edit))?;

    match edited {
        Some(tx) => Ok(Json(ApiResponse::ok(tx))),
        None => Err(ApiError::not_found(
            "TRANSACTION_NOT_FOUND",
            format!("transaction {} not found in account {}", transaction_id, account_id),
        )),
    }
}

/// GET /accounts/:id/conflicts?pending_only=false
async fn list_conflicts(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(query): Query<ConflictQuery>,
) -> ApiResult<Vec<SyncConflict>> {
    load_account(&state, &account_id)?;
    let conflicts = state
        .orchestrator
        .reconciler()
        .list_conflicts(&account_id, query.pending_only)?;
    Ok(Json(ApiResponse::ok(conflicts)))
}

/// POST /conflicts/:id/resolve {"resolution": "keep_local" | "accept_upstream"}
async fn resolve_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<SyncConflict> {
    let resolved = state
        .orchestrator
        .reconciler()
        .resolve_conflict(&conflict_id, request.resolution)?;

    match resolved {
        Some(conflict) => Ok(Json(ApiResponse::ok(conflict))),
        None => Err(ApiError::not_found(
            "CONFLICT_NOT_FOUND",
            format!("conflict {} not found", conflict_id),
        )),
    }
}

/// POST /webhooks/plaid
async fn plaid_webhook(
    State(state): State<AppState>,
    Json(webhook): Json<PlaidWebhook>,
) -> Result<(StatusCode, Json<ApiResponse<WebhookAck>>), ApiError> {
    info!(
        "📨 Plaid webhook {}/{} for item {}",
        webhook.webhook_type, webhook.webhook_code, webhook.item_id
    );

    let db = state.orchestrator.database();
    let accounts = db.with_conn(|conn| find_accounts_by_item(conn, &webhook.item_id))?;
    if accounts.is_empty() {
        return Err(ApiError::not_found(
            "ITEM_NOT_FOUND",
            format!("no linked accounts for item {}", webhook.item_id),
        ));
    }

    let ack = |status: StatusCode, action: &str, accounts: Vec<String>| {
        (
            status,
            Json(ApiResponse::ok(WebhookAck {
                action: action.to_string(),
                accounts,
            })),
        )
    };

    match (webhook.webhook_type.as_str(), webhook.webhook_code.as_str()) {
        (
            "TRANSACTIONS",
            "SYNC_UPDATES_AVAILABLE" | "INITIAL_UPDATE" | "HISTORICAL_UPDATE" | "DEFAULT_UPDATE"
            | "TRANSACTIONS_REMOVED",
        ) => {
            let scheduled: Vec<String> = accounts
                .into_iter()
                .filter(|account| account.is_syncable())
                .map(|account| account.id)
                .collect();

            for account_id in &scheduled {
                spawn_sync(&state, account_id.clone());
            }

            Ok(ack(StatusCode::ACCEPTED, "sync_scheduled", scheduled))
        }
        ("ITEM", "ERROR") => {
            let message = webhook
                .error
                .map(|e| format!("{}: {}", e.error_code, e.error_message))
                .unwrap_or_else(|| "ITEM_ERROR".to_string());
            let ids = mark_accounts(&state, accounts, AccountStatus::Error, Some(&message))?;
            Ok(ack(StatusCode::OK, "marked_error", ids))
        }
        ("ITEM", "USER_PERMISSION_REVOKED") => {
            let ids = mark_accounts(&state, accounts, AccountStatus::Disconnected, None)?;
            Ok(ack(StatusCode::OK, "marked_disconnected", ids))
        }
        (webhook_type, webhook_code) => {
            warn!("Ignoring webhook {}/{}", webhook_type, webhook_code);
            Ok(ack(StatusCode::OK, "ignored", Vec::new()))
        }
    }
}

fn spawn_sync(state: &AppState, account_id: String) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let policy = orchestrator.retry_policy();
        match orchestrator.sync_account_with_retry(&account_id, &policy).await {
            Ok(_) => {}
            Err(SyncError::SyncInProgress { .. }) => {
                info!("Webhook sync for {} skipped, already running", account_id)
            }
            Err(e) => error!("Webhook sync for {} failed: {}", account_id, e),
        }
    });
}

fn mark_accounts(
    state: &AppState,
    accounts: Vec<LinkedAccount>,
    status: AccountStatus,
    last_error: Option<&str>,
) -> Result<Vec<String>, ApiError> {
    let ids: Vec<String> = accounts.into_iter().map(|account| account.id).collect();
    state.orchestrator.database().with_conn(|conn| {
        for id in &ids {
            update_account_status(conn, id, status, last_error)?;
        }
        Ok(())
    })?;
    Ok(ids)
}

// ============================================================================
// Tests
// ============================================================================
