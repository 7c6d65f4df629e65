//! GrantCraft Server
//!
//! HTTP front end for the grant coordinator.
//!
//! ## Endpoints
//!
//! - `POST /verify` - allocate DataCap to `targetAddr` (bearer auth)
//! - `POST /faucet/{target_addr}` - pay a faucet grant (bearer auth)
//! - `GET /account-remaining-bytes/{target_addr}` - client DataCap left
//! - `GET /verifier-remaining-bytes/{target_addr}` - verifier allowance left
//! - `GET /verifiers`, `GET /verified-clients` - ledger listings
//! - `GET /health` - liveness and ledger mode
//!
//! Errors are returned as `{"error": "..."}`.

mod auth;
mod routes;
mod server;

pub use auth::{Authenticator, JwtAuthenticator};
pub use routes::{router, AppState};
pub use server::GrantServer;

use axum::http::StatusCode;
use thiserror::Error;

use grantcraft_coordinator::CoordinatorError;
use grantcraft_ledger::LedgerError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Coordinator(e) => match e {
                CoordinatorError::Validation(_) | CoordinatorError::NothingOwed { .. } => {
                    StatusCode::BAD_REQUEST
                }
                CoordinatorError::Conflict(_)
                | CoordinatorError::Ineligible(_)
                | CoordinatorError::UnknownSubject(_) => StatusCode::FORBIDDEN,
                CoordinatorError::Ledger(LedgerError::NotFound(_)) => StatusCode::BAD_REQUEST,
                CoordinatorError::Ledger(_)
                | CoordinatorError::Store(_)
                | CoordinatorError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CoordinatorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            },
            ServerError::InvalidAddress(_) | ServerError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
