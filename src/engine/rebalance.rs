//! # engine::rebalance
//!
//! **Rebalancer**: keeps the perp short equal to the spot holding.
//!
//! ```text
//!   delta = |spot + perp| / spot
//!   delta < threshold           → nothing
//!   imbalance = spot + perp > 0 → short `imbalance` more
//!   imbalance < 0               → close whole short, settle, re-short `spot`
//! ```
//!
//! A cycle holds the perp leg from its first ledger read to its last
//! action, so an unwind either finishes before the delta is measured or
//! waits until the cycle is done.
//!
//! The ledger is re-read after acting and the new delta reported.

use std::{sync::Arc, time::Duration};

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::executor::ExecContext;
use super::perp::{required_margin, PerpExecutor};
use crate::error::ExecError;
use crate::events::BotEvent;
use crate::metrics::{Metrics, SetDecimal};

/// Pause between closing the short and re-opening it.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RebalanceOutcome {
    /// No spot on the ledger.
    Skipped,
    Balanced { delta: Decimal },
    Rebalanced { before: Decimal, after: Decimal },
    /// Not enough margin to grow the short.
    Deferred { required: Decimal, available: Decimal },
}

pub struct Rebalancer {
    ctx:          ExecContext,
    perp:         Arc<PerpExecutor>,
    metrics:      Arc<Metrics>,
    threshold:    Decimal,
    settle_delay: Duration,
}

impl Rebalancer {
    pub fn new(ctx: ExecContext, perp: Arc<PerpExecutor>, metrics: Arc<Metrics>, threshold: Decimal) -> Self {
        Self { ctx, perp, metrics, threshold, settle_delay: SETTLE_DELAY }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub async fn run(self: Arc<Self>, every: Duration) {
        loop {
            match self.tick().await {
                Ok(outcome) => debug!(?outcome, "Rebalance cycle"),
                Err(e) => {
                    error!(error = %e, "REBALANCE_ERROR — retrying next cycle");
                    self.ctx
                        .notifier
                        .emit(BotEvent::RebalanceFailed { error: e.to_string() })
                        .await;
                }
            }
            tokio::time::sleep(every).await;
        }
    }

    /// One evaluation of the ledger.
    pub async fn tick(&self) -> Result<RebalanceOutcome, ExecError> {
        let _leg = self.perp.lock_leg().await;

        // ── 1. Delta ──────────────────────────────────────────────────────────
        let position = self.ctx.store.get().await?;
        let Some(delta) = position.delta() else {
            return Ok(RebalanceOutcome::Skipped);
        };
        self.metrics.delta_abs.set_decimal(delta);

        if delta < self.threshold {
            return Ok(RebalanceOutcome::Balanced { delta });
        }

        let imbalance = position.imbalance();
        info!(
            spot      = %position.spot,
            perp      = %position.perp,
            delta     = %delta,
            threshold = %self.threshold,
            "🔄 REBALANCE_TRIGGERED"
        );
        self.ctx
            .notifier
            .emit(BotEvent::RebalanceStarted { delta, imbalance })
            .await;

        // ── 2. Act ────────────────────────────────────────────────────────────
        if imbalance > Decimal::ZERO {
            if let Some(deferred) = self.check_margin(imbalance).await? {
                return Ok(deferred);
            }
            self.perp.short(imbalance).await?;
        } else {
            self.perp.close_all().await?;
            tokio::time::sleep(self.settle_delay).await;

            let spot = self.ctx.store.get().await?.spot;
            if spot > Decimal::ZERO {
                if let Some(deferred) = self.check_margin(spot).await? {
                    return Ok(deferred);
                }
                self.perp.short(spot).await?;
            }
        }

        // ── 3. Confirm ────────────────────────────────────────────────────────
        let after = self.ctx.store.get().await?.delta().unwrap_or_default();
        self.metrics.delta_abs.set_decimal(after);
        info!(before = %delta, after = %after, "✅ Rebalance complete");
        self.ctx
            .notifier
            .emit(BotEvent::RebalanceFinished { delta_before: delta, delta_after: after })
            .await;

        Ok(RebalanceOutcome::Rebalanced { before: delta, after })
    }

    /// `Some(Deferred)` when equity cannot carry a short of `qty`.
    async fn check_margin(&self, qty: Decimal) -> Result<Option<RebalanceOutcome>, ExecError> {
        let price = self.ctx.exchange.last_price(self.perp.inst()).await?;
        let available = self.ctx.exchange.equity().await?;
        let required = required_margin(qty, price);
        if available >= required {
            return Ok(None);
        }

        let (required, available) = (required.round_dp(2), available.round_dp(2));
        warn!(required = %required, available = %available, "⚠️ Insufficient margin for rebalance");
        self.ctx
            .notifier
            .emit(BotEvent::RebalanceDeferred { required, available })
            .await;
        Ok(Some(RebalanceOutcome::Deferred { required, available }))
    }
}
