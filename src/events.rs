//! # events
//!
//! **Bot Events**: the single notification port. Every action outcome,
//! threshold breach and lifecycle change goes through [`Notifier::emit`],
//! which fans it out to:
//!
//! ```text
//!   BotEvent ──▶ broadcast (JSON)   ──▶ GET /ws/events dashboards
//!            └─▶ AlertSink (text)   ──▶ Telegram / nothing
//! ```
//!
//! ```json
//! { "event": "THRESHOLD_BREACHED", "monitor": "FUNDING", "value": "0.00001", ... }
//! ```

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::alerts::AlertSink;
use crate::db::Position;
use crate::engine::executor::Action;

/// Dashboard clients that fall further behind than this lose events.
const EVENT_BUFFER: usize = 256;

/// Which observer raised a [`BotEvent::ThresholdBreached`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorKind {
    Funding,
    RiskRatio,
    Apr,
    Liquidation,
    Delever,
    Equity,
}

/// What the monitor did about the breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Unwind,
    PartialSell,
    AlertOnly,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotEvent {
    Started {
        spot_inst: String,
        swap_inst: String,
        simulated: bool,
    },

    /// Ledger already held a carry position at startup.
    PositionsRestored { position: Position },

    /// Cold start opened the carry.
    PositionsOpened { qty: Decimal, loan: Decimal },

    InitFailed { error: String },

    ActionSucceeded { action: Action, amount: Decimal },

    ActionFailed { action: Action, error: String },

    /// Idempotent no-op (e.g. closing an already closed short).
    ActionSkipped { action: Action, reason: &'static str },

    ThresholdBreached {
        monitor:   MonitorKind,
        value:     Decimal,
        threshold: Decimal,
        response:  Response,
    },

    /// Envelope-level or per-item rejection seen by a lenient request.
    ExchangeRejected { path: String, code: String, msg: String },

    RebalanceStarted { delta: Decimal, imbalance: Decimal },

    /// Not enough margin to grow the short; retried next cycle.
    RebalanceDeferred { required: Decimal, available: Decimal },

    RebalanceFinished { delta_before: Decimal, delta_after: Decimal },

    RebalanceFailed { error: String },

    Crashed { task: String, error: String },
}

impl BotEvent {
    /// Serialize to JSON string for the dashboard feed.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Short operator-facing line for the alert sink.
    pub fn to_text(&self) -> String {
        match self {
            BotEvent::Started { spot_inst, swap_inst, simulated } => {
                let mode = if *simulated { "SIMULATED" } else { "LIVE" };
                format!("🚀 Carry bot started ({spot_inst} / {swap_inst}, {mode})")
            }
            BotEvent::PositionsRestored { position } => format!(
                "♻️ State restored: spot {} perp {} loan {} USDT",
                position.spot, position.perp, position.loan
            ),
            BotEvent::PositionsOpened { qty, loan } => {
                format!("✅ Carry opened: {qty} spot / -{qty} perp, loan {loan} USDT")
            }
            BotEvent::InitFailed { error } => format!("❌ Initialization failed: {}", clip(error, 150)),
            BotEvent::ActionSucceeded { action, amount } => format!("✅ {action} {amount}"),
            BotEvent::ActionFailed { action, error } => format!("❌ {action} failed: {}", clip(error, 150)),
            BotEvent::ActionSkipped { action, reason } => format!("ℹ️ {action}: {reason}"),
            BotEvent::ThresholdBreached { monitor, value, threshold, response } => {
                let icon = match response {
                    Response::AlertOnly => "🚨",
                    _ => "‼️",
                };
                format!("{icon} {monitor:?} {value} crossed {threshold} → {response:?}")
            }
            BotEvent::ExchangeRejected { path, code, msg } => {
                if code == crate::gateway::types::CODE_INSUFFICIENT_BALANCE {
                    format!("💰 Insufficient balance: {msg}")
                } else {
                    format!("⚠️ Exchange rejected {path} [{code}]: {msg}")
                }
            }
            BotEvent::RebalanceStarted { delta, imbalance } => {
                format!("🔄 Δ {delta} – rebalancing (imbalance {imbalance})")
            }
            BotEvent::RebalanceDeferred { required, available } => {
                format!("⚠️ Insufficient margin for rebalance. Need ~{required}, have {available}")
            }
            BotEvent::RebalanceFinished { delta_after, .. } => {
                format!("✅ Rebalance complete. New delta: {delta_after}")
            }
            BotEvent::RebalanceFailed { error } => {
                format!("❌ Rebalance failed, retrying next cycle: {}", clip(error, 150))
            }
            BotEvent::Crashed { task, error } => {
                format!("❌ Bot crashed in {task}: {}", clip(error, 200))
            }
        }
    }
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ─── Notifier ─────────────────────────────────────────────────────────────────

/// Cheap to clone; every component gets its own handle.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn AlertSink>,
    tx:   broadcast::Sender<String>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { sink, tx }
    }

    /// Best effort: a missing dashboard or a failing sink never fails the caller.
    pub async fn emit(&self, event: BotEvent) {
        let json = event.to_json();
        debug!(event = %json, "📣 [EVENT]");
        // Err = no dashboard connected
        let _ = self.tx.send(json);
        self.sink.send(&event.to_text()).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::RecordingAlerts;

    #[test]
    fn events_are_tagged_screaming_snake() {
        let event = BotEvent::ThresholdBreached {
            monitor:   MonitorKind::Funding,
            value:     Decimal::new(1, 5),
            threshold: Decimal::new(1, 5),
            response:  Response::Unwind,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["event"], "THRESHOLD_BREACHED");
        assert_eq!(value["monitor"], "FUNDING");
        assert_eq!(value["response"], "UNWIND");
    }

    #[test]
    fn insufficient_balance_rejection_reads_as_balance_alert() {
        let text = BotEvent::ExchangeRejected {
            path: "/api/v5/trade/order".into(),
            code: "51008".into(),
            msg:  "Order failed".into(),
        }
        .to_text();
        assert!(text.starts_with("💰 Insufficient balance"));
    }

    #[tokio::test]
    async fn emit_reaches_sink_and_dashboard() {
        let alerts = Arc::new(RecordingAlerts::default());
        let notifier = Notifier::new(alerts.clone());
        let mut feed = notifier.subscribe();

        notifier
            .emit(BotEvent::ActionSkipped {
                action: Action::PerpClose,
                reason: "nothing to close",
            })
            .await;

        assert_eq!(alerts.messages(), vec!["ℹ️ PERP_CLOSE: nothing to close".to_string()]);
        let json: serde_json::Value = serde_json::from_str(&feed.recv().await.unwrap()).unwrap();
        assert_eq!(json["event"], "ACTION_SKIPPED");
        assert_eq!(json["action"], "PERP_CLOSE");
    }

    #[tokio::test]
    async fn emit_without_dashboard_is_fine() {
        let alerts = Arc::new(RecordingAlerts::default());
        let notifier = Notifier::new(alerts.clone());
        notifier.emit(BotEvent::InitFailed { error: "boom".into() }).await;
        assert_eq!(alerts.messages().len(), 1);
    }
}
