//! # engine::perp
//!
//! **Perp Executor**: the short leg on the perpetual swap, cross margin.
//!
//! `close_all` is idempotent: when the ledger shows no short it reports
//! "nothing to close" and makes no mutating call.
//!
//! Two locks guard the leg. `gate` runs single shorts and closes one at a
//! time, so an ack landing late never rewrites a ledger another action has
//! already committed. `leg` is taken by callers running a multi-step
//! sequence (unwind, rebalance) so those sequences never interleave.

use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use super::executor::{client_order_id, ensure_positive, Action, ActionOutcome, ExecContext};
use crate::error::ExecError;
use crate::gateway::exchange::{PATH_CLOSE_POSITION, PATH_ORDER};

/// Initial margin rate assumed for a new short.
const INITIAL_MARGIN: Decimal = Decimal::from_parts(2, 0, 0, false, 1);
/// Equity must cover this multiple of the initial margin.
const MARGIN_COVER: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Equity needed before shorting `qty` at `price`.
pub fn required_margin(qty: Decimal, price: Decimal) -> Decimal {
    qty.abs() * price * INITIAL_MARGIN * MARGIN_COVER
}

pub struct PerpExecutor {
    ctx:  ExecContext,
    inst: String,
    gate: Mutex<()>,
    leg:  Mutex<()>,
}

impl PerpExecutor {
    pub fn new(ctx: ExecContext, inst: impl Into<String>) -> Self {
        Self { ctx, inst: inst.into(), gate: Mutex::new(()), leg: Mutex::new(()) }
    }

    pub fn inst(&self) -> &str {
        &self.inst
    }

    /// Exclusive use of the perp leg for a sequence of actions.
    pub async fn lock_leg(&self) -> MutexGuard<'_, ()> {
        self.leg.lock().await
    }

    pub async fn short(&self, qty: Decimal) -> Result<ActionOutcome, ExecError> {
        let _held = self.gate.lock().await;
        let result = self.try_short(qty).await;
        self.ctx.report(Action::PerpShort, result).await
    }

    pub async fn close_all(&self) -> Result<ActionOutcome, ExecError> {
        let _held = self.gate.lock().await;
        let result = self.try_close_all().await;
        self.ctx.report(Action::PerpClose, result).await
    }

    async fn try_short(&self, qty: Decimal) -> Result<ActionOutcome, ExecError> {
        // ── 1. Validate ───────────────────────────────────────────────────────
        ensure_positive(Action::PerpShort, qty)?;

        // ── 2. Margin pre-check ───────────────────────────────────────────────
        let price = self.ctx.exchange.last_price(&self.inst).await?;
        let equity = self.ctx.exchange.equity().await?;
        let required = required_margin(qty, price);
        if equity < required {
            return Err(ExecError::InsufficientMargin {
                required:  required.round_dp(2),
                available: equity.round_dp(2),
            });
        }

        // ── 3. Order ──────────────────────────────────────────────────────────
        let order = json!({
            "instId":  self.inst,
            "side":    "sell",
            "ordType": "market",
            "tdMode":  "cross",
            "sz":      qty.to_string(),
            "clOrdId": client_order_id(),
        });
        info!(inst = %self.inst, qty = %qty, cl_ord_id = %order["clOrdId"], "🚀 [PERP] Opening SHORT");
        self.ctx.exchange.post_order(PATH_ORDER, &order).await?;

        // ── 4. Ledger ─────────────────────────────────────────────────────────
        self.ctx
            .store
            .apply(|mut p| {
                p.perp -= qty;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount: qty })
    }

    async fn try_close_all(&self) -> Result<ActionOutcome, ExecError> {
        let perp = self.ctx.store.get().await?.perp;
        if perp >= Decimal::ZERO {
            return Ok(ActionOutcome::NothingToDo { reason: "nothing to close" });
        }

        let payload = json!({
            "instId":  self.inst,
            "mgnMode": "cross",
            "posSide": "short",
        });
        info!(inst = %self.inst, perp = %perp, "🚀 [PERP] Closing SHORT");
        self.ctx.exchange.post_order(PATH_CLOSE_POSITION, &payload).await?;

        self.ctx
            .store
            .apply(|mut p| {
                p.perp = Decimal::ZERO;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount: perp.abs() })
    }
}
