//! # engine::bootstrap
//!
//! Cold start: open the carry when the ledger holds no hedged position.
//!
//! ```text
//!   ledger spot > 0 && perp < 0 ──▶ restored, nothing to do
//!   otherwise: equity, price ─▶ borrow equity × leverage ─▶ re-read equity
//!              ─▶ qty = floor(equity × 0.95 / price) ─▶ buy qty (no auto-loan) ─▶ short qty
//! ```
//!
//! Any failure is fatal: the caller aborts before starting the monitors.

use rust_decimal::Decimal;
use tracing::info;

use super::borrow::BorrowExecutor;
use super::executor::ExecContext;
use super::perp::PerpExecutor;
use super::spot::SpotExecutor;
use crate::db::Position;
use crate::error::{ExecError, GatewayError};
use crate::events::BotEvent;

/// Share of equity committed to the spot leg.
const EQUITY_USAGE: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bootstrap {
    Restored(Position),
    Opened { qty: Decimal, loan: Decimal },
}

pub struct Legs<'a> {
    pub spot:   &'a SpotExecutor,
    pub perp:   &'a PerpExecutor,
    pub borrow: &'a BorrowExecutor,
}

pub async fn init_positions(
    ctx: &ExecContext,
    legs: Legs<'_>,
    spot_inst: &str,
    leverage: Decimal,
) -> Result<Bootstrap, ExecError> {
    let position = ctx.store.get().await?;
    if position.is_carrying() {
        info!(spot = %position.spot, perp = %position.perp, loan = %position.loan, "♻️ STATE_RESTORED");
        ctx.notifier.emit(BotEvent::PositionsRestored { position }).await;
        return Ok(Bootstrap::Restored(position));
    }

    // ── 1. Equity + price ─────────────────────────────────────────────────────
    let initial_equity = ctx.exchange.equity().await?;
    let price = ctx.exchange.last_price(spot_inst).await?;
    if price <= Decimal::ZERO {
        return Err(GatewayError::InvalidRequest(format!("invalid price {price} for {spot_inst}")).into());
    }

    // ── 2. Borrow ─────────────────────────────────────────────────────────────
    let loan = initial_equity * leverage;
    legs.borrow.borrow(loan).await?;

    // ── 3. Size ───────────────────────────────────────────────────────────────
    let equity = ctx.exchange.equity().await?;
    info!(initial = %initial_equity, after_borrow = %equity, loan = %loan, "EQUITY_CHECK");
    let usable = equity * EQUITY_USAGE;
    let qty = (usable / price).floor();
    if qty <= Decimal::ZERO {
        return Err(ExecError::InsufficientBalance { required: price, available: usable });
    }

    // ── 4. Legs ───────────────────────────────────────────────────────────────
    legs.spot.buy(qty, false).await?;
    legs.perp.short(qty).await?;

    info!(qty = %qty, price = %price, loan = %loan, "✅ INIT_COMPLETE");
    ctx.notifier.emit(BotEvent::PositionsOpened { qty, loan }).await;
    Ok(Bootstrap::Opened { qty, loan })
}
