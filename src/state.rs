//! # state
//!
//! Read-side state injected into every Axum handler. The bot's tasks own
//! the write side; handlers only observe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config::Thresholds;
use crate::db::StateStore;
use crate::events::Notifier;
use crate::gateway::ws::ConnectionState;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    // ── Ledger ────────────────────────────────────────────────────────────────
    pub store:      Arc<StateStore>,

    // ── Observability ─────────────────────────────────────────────────────────
    pub metrics:    Arc<Metrics>,
    /// Phase of the private WebSocket, published by its connection task.
    pub connection: watch::Receiver<ConnectionState>,
    /// Source of the `/ws/events` feed.
    pub notifier:   Notifier,

    pub thresholds: Thresholds,
    pub started_at: DateTime<Utc>,
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;
