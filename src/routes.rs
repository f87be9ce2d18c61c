//! HTTP routes for recording and querying campaign transactions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use indexmap::IndexSet;
use serde::Serialize;

use crate::error::LedgerError;
use crate::model::{Block, ContentAddress, TransactionInput, TransactionRecord};
use crate::query::QueryEngine;
use crate::service::{LedgerService, ReconcileReport};

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub queries: Arc<QueryEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ledger/add", post(add_transaction))
        .route("/ledger/transactions", get(list_transactions))
        .route("/ledger/transactions/:id", get(campaign_transactions))
        .route("/ledger/transactions/unique/:id", get(campaign_users))
        .route("/ledger/validate", get(validate_chain))
        .route("/ledger/reconcile", post(reconcile))
        .route("/ledger/:uid", get(user_campaigns))
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(state)
}

/// Error body: `{ success: false, error: <kind>, message }`.
pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = ErrorBody { success: false, error: self.0.kind(), message: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct AddResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(rename = "ipfsHash")]
    pub content_address: ContentAddress,
    pub block: Block,
}

/// POST /ledger/add
pub async fn add_transaction(
    State(state): State<AppState>,
    payload: Result<Json<TransactionInput>, JsonRejection>,
) -> Result<(StatusCode, Json<AddResponse>), ApiError> {
    let Json(input) =
        payload.map_err(|rejection| LedgerError::validation("body", rejection.body_text()))?;
    let receipt = state.ledger.record_transaction(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddResponse {
            success: true,
            message: "Transaction added",
            content_address: receipt.content_address,
            block: receipt.block,
        }),
    ))
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub success: bool,
    pub transactions: Vec<TransactionRecord>,
}

/// GET /ledger/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state.queries.list_all().await?;
    Ok(Json(TransactionsResponse { success: true, transactions }))
}

/// GET /ledger/transactions/:id: records for one campaign
pub async fn campaign_transactions(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    Ok(Json(state.queries.by_campaign(&campaign_id).await?))
}

#[derive(Serialize)]
pub struct UserCampaignsResponse {
    pub success: bool,
    pub transactions: IndexSet<String>,
}

/// GET /ledger/:uid: campaigns a user contributed to
pub async fn user_campaigns(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserCampaignsResponse>, ApiError> {
    let transactions = state.queries.campaigns_for_user(&user_id).await?;
    Ok(Json(UserCampaignsResponse { success: true, transactions }))
}

#[derive(Serialize)]
pub struct CampaignUsersResponse {
    pub success: bool,
    pub users: IndexSet<String>,
}

/// GET /ledger/transactions/unique/:id: contributors to a campaign
pub async fn campaign_users(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CampaignUsersResponse>, ApiError> {
    let users = state.queries.users_for_campaign(&campaign_id).await?;
    Ok(Json(CampaignUsersResponse { success: true, users }))
}

/// GET /ledger/validate: recompute every hash and link
#[derive(Serialize)]
pub struct ValidateResp {
    pub ok: bool,
    pub length: usize,
    pub first_invalid_index: Option<u64>,
    pub reason: Option<String>,
}

pub async fn validate_chain(State(state): State<AppState>) -> Json<ValidateResp> {
    let length = state.ledger.chain_len();
    let resp = match state.ledger.verify() {
        Ok(()) => ValidateResp { ok: true, length, first_invalid_index: None, reason: None },
        Err(LedgerError::ChainIntegrity { index, reason }) => ValidateResp {
            ok: false,
            length,
            first_invalid_index: Some(index),
            reason: Some(reason),
        },
        Err(other) => ValidateResp {
            ok: false,
            length,
            first_invalid_index: None,
            reason: Some(other.to_string()),
        },
    };
    Json(resp)
}

/// POST /ledger/reconcile: re-insert index rows missing for chain blocks
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    Ok(Json(state.ledger.reconcile().await?))
}

/// GET /health. `degraded` once a verification has found a broken block.
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_index: Option<u64>,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let violation = state.ledger.last_check().and_then(|check| check.violation);
    Json(Health {
        status: if violation.is_some() { "degraded" } else { "ok" },
        blocks: state.ledger.chain_len(),
        first_invalid_index: violation.map(|v| v.index),
    })
}

/// GET /version
#[derive(Serialize)]
pub struct Version {
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
}

pub async fn version() -> Json<Version> {
    Json(Version {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("GIT_SHA"),
    })
}
