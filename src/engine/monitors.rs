//! # engine::monitors
//!
//! **Monitors**: independent observers that defend the carry.
//!
//! | Monitor      | Source                      | Trigger                              | Response            |
//! |--------------|-----------------------------|--------------------------------------|---------------------|
//! | funding      | WS `funding-rate` (swap)    | `fundingRate <= funding_flip`        | unwind              |
//! | risk ratio   | WS `account`                | `riskRatio >= risk_alert`            | alert only          |
//! | APR          | poll `max-loan` every N s   | `interestRate >= apr_exit`           | unwind              |
//! | liquidation  | WS `positions` (swap)       | `(liq - mark) / mark <= liq_gap`     | unwind, then maybe sell `delever_fraction` of spot |
//! | equity guard | poll `balance` every N s    | drawdown from reference `>= equity_drawdown` | alert only  |
//!
//! A failing iteration is logged and reported; the loop keeps running.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::executor::ExecContext;
use super::spot::SpotExecutor;
use super::unwind::Unwinder;
use crate::config::Thresholds;
use crate::error::ExecError;
use crate::events::{BotEvent, MonitorKind, Response};
use crate::gateway::{
    exchange::QUOTE_CCY,
    types::{opt_num, text, PushFrame},
    ws::Subscription,
};
use crate::metrics::{Metrics, SetDecimal};

/// What one observation led to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Frame did not concern us or carried no usable figure.
    Ignored,
    /// Within limits.
    Hold,
    Alerted,
    Unwound,
    /// Unwound, then sold part of the spot holding.
    Delevered { sold: Decimal },
}

pub struct Monitors {
    ctx:          ExecContext,
    metrics:      Arc<Metrics>,
    thresholds:   Thresholds,
    swap_inst:    String,
    unwinder:     Arc<Unwinder>,
    spot:         Arc<SpotExecutor>,
    risk_alarm:   AtomicBool,
    equity_alarm: AtomicBool,
}

impl Monitors {
    pub fn new(
        ctx: ExecContext,
        metrics: Arc<Metrics>,
        thresholds: Thresholds,
        swap_inst: impl Into<String>,
        unwinder: Arc<Unwinder>,
        spot: Arc<SpotExecutor>,
    ) -> Self {
        Self {
            ctx,
            metrics,
            thresholds,
            swap_inst: swap_inst.into(),
            unwinder,
            spot,
            risk_alarm: AtomicBool::new(false),
            equity_alarm: AtomicBool::new(false),
        }
    }

    // ─── Funding ──────────────────────────────────────────────────────────────

    pub async fn on_funding(&self, frame: &PushFrame) -> Result<Verdict, ExecError> {
        let Some(item) = frame.data.first() else { return Ok(Verdict::Ignored) };
        if !self.is_swap(item) {
            return Ok(Verdict::Ignored);
        }
        let Some(rate) = opt_num(item, "fundingRate") else { return Ok(Verdict::Ignored) };

        self.metrics.funding_rate.set_decimal(rate);
        debug!(rate = %rate, "Funding rate");

        let threshold = self.thresholds.funding_flip;
        if rate > threshold {
            return Ok(Verdict::Hold);
        }
        self.unwind_on(MonitorKind::Funding, rate, threshold, "funding flip").await
    }

    // ─── Risk ratio ───────────────────────────────────────────────────────────

    /// Alert once per excursion above the limit; re-arms when the ratio drops back.
    pub async fn on_risk(&self, frame: &PushFrame) -> Result<Verdict, ExecError> {
        let Some(ratio) = frame.data.first().and_then(|d| opt_num(d, "riskRatio")) else {
            return Ok(Verdict::Ignored);
        };
        self.metrics.risk_ratio.set_decimal(ratio);

        let threshold = self.thresholds.risk_alert;
        if ratio < threshold {
            self.risk_alarm.store(false, Ordering::Relaxed);
            return Ok(Verdict::Hold);
        }
        if self.risk_alarm.swap(true, Ordering::Relaxed) {
            return Ok(Verdict::Hold);
        }
        error!(risk_ratio = %ratio, threshold = %threshold, "🚨 [RISK] EMERGENCY — manual action required");
        self.breach(MonitorKind::RiskRatio, ratio, threshold, Response::AlertOnly).await;
        Ok(Verdict::Alerted)
    }

    // ─── Borrow APR ───────────────────────────────────────────────────────────

    pub async fn check_apr(&self) -> Result<Verdict, ExecError> {
        let apr = self.ctx.exchange.loan_rate(QUOTE_CCY).await?;
        debug!(apr = %apr, "Borrow APR");

        let threshold = self.thresholds.apr_exit;
        if apr < threshold {
            return Ok(Verdict::Hold);
        }
        self.unwind_on(MonitorKind::Apr, apr, threshold, "borrow APR too high").await
    }

    // ─── Liquidation gap ──────────────────────────────────────────────────────

    pub async fn on_position(&self, frame: &PushFrame) -> Result<Verdict, ExecError> {
        for item in &frame.data {
            if !self.is_swap(item) || !is_short(item) {
                continue;
            }
            let (Some(liq), Some(mark)) = (opt_num(item, "liqPx"), opt_num(item, "markPx")) else {
                continue;
            };
            if liq.is_zero() || mark.is_zero() {
                continue;
            }

            let gap = (liq - mark) / mark;
            self.metrics.liq_gap.set_decimal(gap);
            debug!(liq = %liq, mark = %mark, gap = %gap, "Liquidation gap");

            let threshold = self.thresholds.liq_gap;
            if gap > threshold {
                return Ok(Verdict::Hold);
            }

            if !self.has_exposure().await? {
                debug!(gap = %gap, "Liquidation gap crossed but no exposure left");
                return Ok(Verdict::Hold);
            }

            warn!(mark = %mark, liq = %liq, gap = %gap, "‼️ [LIQ] Mark approaching liquidation");
            self.breach(MonitorKind::Liquidation, gap, threshold, Response::Unwind).await;
            let report = self.unwinder.unwind("liquidation proximity").await?;
            if !report.acted() {
                // Another monitor already unwound; do not sell twice.
                return Ok(Verdict::Hold);
            }
            return self.delever().await;
        }
        Ok(Verdict::Ignored)
    }

    /// After a liquidation unwind: sell part of the spot while the account
    /// risk ratio stays elevated.
    async fn delever(&self) -> Result<Verdict, ExecError> {
        let ratio = self.ctx.exchange.risk_ratio().await?;
        self.metrics.risk_ratio.set_decimal(ratio);

        let threshold = self.thresholds.delever_risk;
        if ratio < threshold {
            return Ok(Verdict::Unwound);
        }

        let spot = self.ctx.store.get().await?.spot;
        let cut = (spot * self.thresholds.delever_fraction).normalize();
        if cut <= Decimal::ZERO {
            return Ok(Verdict::Unwound);
        }

        warn!(risk_ratio = %ratio, sell = %cut, "‼️ [LIQ] De-leveraging spot");
        self.breach(MonitorKind::Delever, ratio, threshold, Response::PartialSell).await;
        self.spot.sell(cut).await?;
        Ok(Verdict::Delevered { sold: cut })
    }

    // ─── Equity guard ─────────────────────────────────────────────────────────

    /// Track equity against a stored high-water reference and alert on drawdown.
    pub async fn check_equity(&self) -> Result<Verdict, ExecError> {
        let equity = self.ctx.exchange.equity().await?;
        if equity <= Decimal::ZERO {
            return Ok(Verdict::Ignored);
        }
        self.metrics.account_equity.set_decimal(equity);

        let reference = match self.ctx.store.equity_reference().await? {
            Some(r) if r.equity > Decimal::ZERO => r,
            _ => {
                self.ctx.store.save_equity_reference(equity).await?;
                info!(equity = %equity, "Equity reference stored");
                return Ok(Verdict::Hold);
            }
        };

        if equity > reference.equity {
            self.ctx.store.save_equity_reference(equity).await?;
            self.equity_alarm.store(false, Ordering::Relaxed);
            return Ok(Verdict::Hold);
        }

        let drawdown = (reference.equity - equity) / reference.equity;
        let threshold = self.thresholds.equity_drawdown;
        if drawdown < threshold {
            self.equity_alarm.store(false, Ordering::Relaxed);
            return Ok(Verdict::Hold);
        }
        if self.equity_alarm.swap(true, Ordering::Relaxed) {
            return Ok(Verdict::Hold);
        }
        warn!(
            equity    = %equity,
            reference = %reference.equity,
            since     = %reference.observed_at,
            drawdown  = %drawdown,
            "🚨 [EQUITY] Drawdown limit reached"
        );
        self.breach(MonitorKind::Equity, drawdown, threshold, Response::AlertOnly).await;
        Ok(Verdict::Alerted)
    }

    // ─── Loops ────────────────────────────────────────────────────────────────

    pub async fn run_funding(self: Arc<Self>, mut sub: Subscription) {
        while let Some(frame) = sub.next().await {
            if let Err(e) = self.on_funding(&frame).await {
                error!(error = %e, "Funding monitor iteration failed");
            }
        }
        info!(channel = %sub.arg().channel, "Funding monitor stopped");
    }

    pub async fn run_risk(self: Arc<Self>, mut sub: Subscription) {
        while let Some(frame) = sub.next().await {
            if let Err(e) = self.on_risk(&frame).await {
                error!(error = %e, "Risk monitor iteration failed");
            }
        }
        info!(channel = %sub.arg().channel, "Risk monitor stopped");
    }

    pub async fn run_liquidation(self: Arc<Self>, mut sub: Subscription) {
        while let Some(frame) = sub.next().await {
            if let Err(e) = self.on_position(&frame).await {
                error!(error = %e, "Liquidation monitor iteration failed");
            }
        }
        info!(channel = %sub.arg().channel, "Liquidation monitor stopped");
    }

    pub async fn run_apr(self: Arc<Self>, every: Duration) {
        loop {
            if let Err(e) = self.check_apr().await {
                error!(error = %e, "APR monitor iteration failed");
            }
            tokio::time::sleep(every).await;
        }
    }

    pub async fn run_equity_guard(self: Arc<Self>, every: Duration) {
        loop {
            if let Err(e) = self.check_equity().await {
                error!(error = %e, "Equity guard iteration failed");
            }
            tokio::time::sleep(every).await;
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    /// Items without `instId` are accepted; subscriptions are already scoped.
    fn is_swap(&self, item: &serde_json::Value) -> bool {
        let inst = text(item, "instId");
        inst.is_empty() || inst == self.swap_inst
    }

    /// Unwind unless the ledger is already flat.
    async fn unwind_on(
        &self,
        monitor: MonitorKind,
        value: Decimal,
        threshold: Decimal,
        reason: &str,
    ) -> Result<Verdict, ExecError> {
        if !self.has_exposure().await? {
            debug!(?monitor, value = %value, "Threshold crossed but no exposure left");
            return Ok(Verdict::Hold);
        }

        warn!(?monitor, value = %value, threshold = %threshold, "‼️ Threshold crossed — unwinding");
        self.breach(monitor, value, threshold, Response::Unwind).await;
        self.unwinder.unwind(reason).await?;
        Ok(Verdict::Unwound)
    }

    /// An open short or an outstanding loan is left to unwind.
    async fn has_exposure(&self) -> Result<bool, ExecError> {
        let position = self.ctx.store.get().await?;
        Ok(position.perp < Decimal::ZERO || position.loan > Decimal::ZERO)
    }

    async fn breach(&self, monitor: MonitorKind, value: Decimal, threshold: Decimal, response: Response) {
        self.ctx
            .notifier
            .emit(BotEvent::ThresholdBreached { monitor, value, threshold, response })
            .await;
    }
}

/// Short leg in long/short mode, or a negative net position.
fn is_short(item: &serde_json::Value) -> bool {
    match text(item, "posSide").as_str() {
        "short" => true,
        "net" => opt_num(item, "pos").is_some_and(|p| p < Decimal::ZERO),
        _ => false,
    }
}
