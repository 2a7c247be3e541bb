//! # engine::executor
//!
//! Shared contract of every side-effecting exchange action.
//!
//! ```text
//!   validate qty ─▶ pre-checks (fresh reads) ─▶ signed mutating call ─▶ ledger.apply
//!        │                 │                           │
//!        └── InvalidQuantity / Insufficient* ──────────┴── *Rejected  (ledger untouched)
//! ```
//!
//! Every outcome, success or failure, is logged and emitted through the
//! notifier by [`ExecContext::report`].

use std::{fmt, sync::Arc};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use crate::db::StateStore;
use crate::error::ExecError;
use crate::events::{BotEvent, Notifier};
use crate::gateway::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Borrow,
    Repay,
    SpotBuy,
    SpotSell,
    PerpShort,
    PerpClose,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Borrow    => "BORROW",
            Action::Repay     => "REPAY",
            Action::SpotBuy   => "SPOT_BUY",
            Action::SpotSell  => "SPOT_SELL",
            Action::PerpShort => "PERP_SHORT",
            Action::PerpClose => "PERP_CLOSE",
        };
        f.write_str(name)
    }
}

/// Result of an action that did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionOutcome {
    /// Exchange confirmed and the ledger was updated by `amount`.
    Executed { amount: Decimal },
    /// Ledger shows nothing to act on; no mutating call was made.
    NothingToDo { reason: &'static str },
}

impl ActionOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, ActionOutcome::Executed { .. })
    }
}

/// Reject non-positive sizes before any network call.
pub fn ensure_positive(action: Action, qty: Decimal) -> Result<(), ExecError> {
    if qty <= Decimal::ZERO {
        return Err(ExecError::InvalidQuantity { action, qty });
    }
    Ok(())
}

/// 32-char hex id attached to every order as `clOrdId`.
pub fn client_order_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ─── Context ──────────────────────────────────────────────────────────────────

/// What every executor needs: the exchange port, the ledger and the notifier.
#[derive(Clone)]
pub struct ExecContext {
    pub exchange: Arc<dyn Exchange>,
    pub store:    Arc<StateStore>,
    pub notifier: Notifier,
}

impl ExecContext {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<StateStore>, notifier: Notifier) -> Self {
        Self { exchange, store, notifier }
    }

    /// Log + notify, then hand the result back unchanged.
    pub async fn report(
        &self,
        action: Action,
        result: Result<ActionOutcome, ExecError>,
    ) -> Result<ActionOutcome, ExecError> {
        let event = match &result {
            Ok(ActionOutcome::Executed { amount }) => {
                info!(action = %action, amount = %amount, "✅ [EXECUTOR] Action confirmed");
                BotEvent::ActionSucceeded { action, amount: *amount }
            }
            Ok(ActionOutcome::NothingToDo { reason }) => {
                info!(action = %action, reason, "[EXECUTOR] Nothing to do");
                BotEvent::ActionSkipped { action, reason: *reason }
            }
            Err(e) => {
                error!(action = %action, error = %e, "❌ [EXECUTOR] Action failed");
                BotEvent::ActionFailed { action, error: e.to_string() }
            }
        };
        self.notifier.emit(event).await;
        result
    }
}
