//! Route table and handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use grantcraft_coordinator::{AccountRemaining, AllowanceQueries, RequestCoordinator};
use grantcraft_core::{Amount, SubjectId};
use grantcraft_ledger::{LedgerMode, VerifiedEntry};

use crate::{Authenticator, Result, ServerError};

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RequestCoordinator>,
    pub queries: Arc<AllowanceQueries>,
    pub auth: Arc<dyn Authenticator>,
    pub mode: LedgerMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub target_addr: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub cid: String,
}

#[derive(Debug, Serialize)]
pub struct FaucetResponse {
    pub cid: String,
    pub sent: Amount,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/verify", post(verify))
        .route("/faucet/{target_addr}", post(faucet))
        .route("/account-remaining-bytes/{target_addr}", get(account_remaining))
        .route("/verifier-remaining-bytes/{target_addr}", get(verifier_remaining))
        .route("/verifiers", get(verifiers))
        .route("/verified-clients", get(verified_clients))
        .route("/health", get(health))
        .with_state(state)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<SubjectId> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServerError::Unauthorized("missing bearer token".to_string()))?;
    state.auth.authenticate(token)
}

/// POST /verify
async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>> {
    let Json(request) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let subject = authenticate(&state, &headers)?;

    let receipt = state
        .coordinator
        .request_allocation(&subject, &request.target_addr)
        .await?;
    Ok(Json(VerifyResponse {
        cid: receipt.tx.to_string(),
    }))
}

/// POST /faucet/{target_addr}
async fn faucet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_addr): Path<String>,
) -> Result<Json<FaucetResponse>> {
    let subject = authenticate(&state, &headers)?;

    let receipt = state.coordinator.request_faucet(&subject, &target_addr).await?;
    Ok(Json(FaucetResponse {
        cid: receipt.tx.to_string(),
        sent: receipt.sent,
    }))
}

/// GET /account-remaining-bytes/{target_addr}
async fn account_remaining(
    State(state): State<AppState>,
    Path(target_addr): Path<String>,
) -> Result<Json<AccountRemaining>> {
    Ok(Json(state.queries.account_remaining(&target_addr).await?))
}

/// GET /verifier-remaining-bytes/{target_addr}
async fn verifier_remaining(
    State(state): State<AppState>,
    Path(target_addr): Path<String>,
) -> Result<Json<Amount>> {
    Ok(Json(state.queries.verifier_remaining(&target_addr).await?))
}

async fn verifiers(State(state): State<AppState>) -> Result<Json<Vec<VerifiedEntry>>> {
    Ok(Json(state.queries.verifiers().await?))
}

async fn verified_clients(State(state): State<AppState>) -> Result<Json<Vec<VerifiedEntry>>> {
    Ok(Json(state.queries.verified_clients().await?))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "mode": state.mode.as_str() }))
}
