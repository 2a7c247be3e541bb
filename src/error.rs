//! # error
//!
//! Error taxonomy for the carry keeper.
//!
//! | Type           | Raised by                    | Policy                                   |
//! |----------------|------------------------------|------------------------------------------|
//! | `AuthError`    | config / signer construction | fatal at startup                         |
//! | `GatewayError` | REST + private WebSocket     | recovered inside the stream, surfaced on REST |
//! | `LedgerError`  | SQLite state store           | surfaced to the caller                   |
//! | `ExecError`    | Borrow / Spot / Perp actions | alerted, loop continues next cycle       |
//! | `AppError`     | status HTTP routes           | rendered as JSON `{ok:false}`            |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::engine::executor::Action;

// ─── Startup ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing OKX credentials: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Credential rejected: {0}")]
    Invalid(String),
}

// ─── Transport ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Connection refused, TLS failure, timeout on the REST client.
    #[error("HTTP transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP status.
    #[error("Exchange returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Malformed exchange payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope or per-item status code was not the success code.
    #[error("Order rejected [{code}]: {msg}")]
    OrderRejected { code: String, msg: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Read timeout or abrupt close. Triggers a reconnect, never reaches stream consumers.
    #[error("Stale connection: {0}")]
    StaleConnection(&'static str),

    #[error("WebSocket login failed: {0}")]
    LoginFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}

// ─── Executors ────────────────────────────────────────────────────────────────

/// Business-rule failures of a single exchange action.
///
/// Pre-check variants (`InvalidQuantity`, `Insufficient*`) are raised before
/// any mutating call; the `*Rejected` variants after the exchange refused it.
/// In every case the ledger is left untouched.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invalid quantity for {action}: {qty}")]
    InvalidQuantity { action: Action, qty: Decimal },

    #[error("Insufficient margin: need ~{required}, have {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    #[error("Insufficient balance: need ~{required}, have {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Insufficient loan quota: requested {requested}, available {available}")]
    InsufficientQuota { requested: Decimal, available: Decimal },

    #[error("Order rejected [{code}]: {msg}")]
    OrderRejected { code: String, msg: String },

    #[error("Borrow rejected [{code}]: {msg}")]
    BorrowRejected { code: String, msg: String },

    #[error("Repay rejected [{code}]: {msg}")]
    RepayRejected { code: String, msg: String },

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<GatewayError> for ExecError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::OrderRejected { code, msg } => ExecError::OrderRejected { code, msg },
            other => ExecError::Gateway(other),
        }
    }
}

impl ExecError {
    /// Re-label a generic order rejection for the borrow/repay endpoint.
    pub fn into_borrow_rejection(self) -> Self {
        match self {
            ExecError::OrderRejected { code, msg } => ExecError::BorrowRejected { code, msg },
            other => other,
        }
    }

    pub fn into_repay_rejection(self) -> Self {
        match self {
            ExecError::OrderRejected { code, msg } => ExecError::RepayRejected { code, msg },
            other => other,
        }
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The ledger could not be read for a status request.
    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Ledger(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            AppError::Metrics(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
