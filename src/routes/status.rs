//! # routes::status
//!
//! | Method | Path          | Description                                        |
//! |--------|---------------|----------------------------------------------------|
//! | GET    | `/metrics`    | Prometheus text exposition of the gauges           |
//! | GET    | `/api/status` | ledger, delta, WS phase, thresholds, uptime        |

use axum::{extract::State, http::header, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::SharedState;

/// GET /metrics
pub async fn metrics(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, state.metrics.content_type())], body))
}

/// GET /api/status
pub async fn get_status(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let position = state.store.get().await?;
    let connection = state.connection.borrow().clone();
    let uptime = (Utc::now() - state.started_at).num_seconds();

    Ok(Json(json!({
        "ok":          true,
        "position":    position,
        "delta":       position.delta(),
        "carrying":    position.is_carrying(),
        "connection":  connection,
        "thresholds":  state.thresholds,
        "uptime_secs": uptime,
    })))
}
