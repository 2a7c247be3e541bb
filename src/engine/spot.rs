//! # engine::spot
//!
//! **Spot Executor**: market buy/sell of the long leg in cash mode.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

use super::executor::{client_order_id, ensure_positive, Action, ActionOutcome, ExecContext};
use crate::error::ExecError;
use crate::gateway::exchange::PATH_ORDER;

/// Estimated cost may use at most this share of equity.
const BALANCE_BUFFER: Decimal = Decimal::from_parts(98, 0, 0, false, 2);

pub struct SpotExecutor {
    ctx:  ExecContext,
    inst: String,
}

impl SpotExecutor {
    pub fn new(ctx: ExecContext, inst: impl Into<String>) -> Self {
        Self { ctx, inst: inst.into() }
    }

    /// Market buy of `qty` base units. `auto_loan` lets the exchange borrow
    /// any shortfall in the quote currency.
    pub async fn buy(&self, qty: Decimal, auto_loan: bool) -> Result<ActionOutcome, ExecError> {
        let result = self.try_buy(qty, auto_loan).await;
        self.ctx.report(Action::SpotBuy, result).await
    }

    pub async fn sell(&self, qty: Decimal) -> Result<ActionOutcome, ExecError> {
        let result = self.try_sell(qty).await;
        self.ctx.report(Action::SpotSell, result).await
    }

    async fn try_buy(&self, qty: Decimal, auto_loan: bool) -> Result<ActionOutcome, ExecError> {
        // ── 1. Validate ───────────────────────────────────────────────────────
        ensure_positive(Action::SpotBuy, qty)?;

        // ── 2. Balance pre-check ──────────────────────────────────────────────
        let price = self.ctx.exchange.last_price(&self.inst).await?;
        let equity = self.ctx.exchange.equity().await?;
        let estimated_cost = qty * price;
        info!(qty = %qty, price = %price, estimated_cost = %estimated_cost, equity = %equity, "SPOT_BUY_CHECK");
        if estimated_cost > equity * BALANCE_BUFFER {
            return Err(ExecError::InsufficientBalance {
                required:  estimated_cost.round_dp(2),
                available: equity.round_dp(2),
            });
        }

        // ── 3. Order ──────────────────────────────────────────────────────────
        let mut order = json!({
            "instId":  self.inst,
            "side":    "buy",
            "ordType": "market",
            "tdMode":  "cash",
            "tgtCcy":  "base_ccy",
            "sz":      qty.to_string(),
            "clOrdId": client_order_id(),
        });
        if auto_loan {
            order["loanTrans"] = json!("auto");
        }
        info!(inst = %self.inst, qty = %qty, cl_ord_id = %order["clOrdId"], "🚀 [SPOT] Sending market BUY");
        self.ctx.exchange.post_order(PATH_ORDER, &order).await?;

        // ── 4. Ledger ─────────────────────────────────────────────────────────
        self.ctx
            .store
            .apply(|mut p| {
                p.spot += qty;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount: qty })
    }

    async fn try_sell(&self, qty: Decimal) -> Result<ActionOutcome, ExecError> {
        ensure_positive(Action::SpotSell, qty)?;

        if let Some(limit) = self.ctx.exchange.max_avail_size(&self.inst, "cash").await? {
            if qty > limit.sell {
                return Err(ExecError::InsufficientBalance { required: qty, available: limit.sell });
            }
        }

        let order = json!({
            "instId":    self.inst,
            "side":      "sell",
            "ordType":   "market",
            "tdMode":    "cash",
            "tgtCcy":    "base_ccy",
            "sz":        qty.to_string(),
            "loanTrans": "auto",
            "clOrdId":   client_order_id(),
        });
        info!(inst = %self.inst, qty = %qty, cl_ord_id = %order["clOrdId"], "🚀 [SPOT] Sending market SELL");
        self.ctx.exchange.post_order(PATH_ORDER, &order).await?;

        self.ctx
            .store
            .apply(|mut p| {
                p.spot -= qty;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount: qty })
    }
}
