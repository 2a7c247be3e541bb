//! # db: SQLite Position Ledger
//!
//! One singleton row `{spot_qty, perp_qty, loan_usdt}` plus an optional
//! equity reference. The row changes only after an exchange action is
//! confirmed, so it always mirrors the last committed state.
//!
//! Every access goes through one async gate. [`StateStore::apply`] holds it
//! across read → compute → write, which is how executors update the ledger:
//!
//! ```text
//!   task A ──lock──▶ get ─▶ f(pos) ─▶ save ──unlock──┐
//!   task B ───────────── waits ──────────────────────┴──lock──▶ get ─▶ …
//! ```

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Executor,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::LedgerError;

// ─── Position ─────────────────────────────────────────────────────────────────

/// Ledger snapshot. `perp` is negative while short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub spot: Decimal,
    pub perp: Decimal,
    pub loan: Decimal,
}

impl Position {
    /// Signed directional exposure: positive = excess spot, negative = excess short.
    pub fn imbalance(&self) -> Decimal {
        self.spot + self.perp
    }

    /// Normalised delta `|spot + perp| / spot`; `None` with no spot to balance.
    pub fn delta(&self) -> Option<Decimal> {
        if self.spot.is_zero() {
            return None;
        }
        Some(self.imbalance().abs() / self.spot)
    }

    /// Long spot hedged by a short perp.
    pub fn is_carrying(&self) -> bool {
        self.spot > Decimal::ZERO && self.perp < Decimal::ZERO
    }
}

/// Last stored account equity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityRef {
    pub equity:      Decimal,
    pub observed_at: DateTime<Utc>,
}

// ─── Store ────────────────────────────────────────────────────────────────────

pub struct StateStore {
    pool: SqlitePool,
    gate: Mutex<()>,
}

impl StateStore {
    /// Open (creating if needed) the ledger database and apply the schema.
    pub async fn open(database_url: &str) -> Result<Self, LedgerError> {
        info!(url = %database_url, "Opening ledger...");
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    /// Fresh ledger that lives only as long as the store. The single connection
    /// must never be recycled or the database disappears with it.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, LedgerError> {
        pool.execute(include_str!("../migrations/001_ledger.sql")).await?;
        Ok(Self { pool, gate: Mutex::new(()) })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Ledger ────────────────────────────────────────────────────────────────

    pub async fn get(&self) -> Result<Position, LedgerError> {
        let _held = self.gate.lock().await;
        self.read().await
    }

    /// Overwrite the ledger. Last write wins; prefer [`apply`](Self::apply)
    /// when the new value depends on the old one.
    pub async fn save(&self, position: Position) -> Result<(), LedgerError> {
        let _held = self.gate.lock().await;
        self.write(&position).await
    }

    /// Atomic read-modify-write. No other get/save/apply interleaves with it.
    pub async fn apply<F>(&self, f: F) -> Result<Position, LedgerError>
    where
        F: FnOnce(Position) -> Position,
    {
        let _held = self.gate.lock().await;
        let next = f(self.read().await?);
        self.write(&next).await?;
        Ok(next)
    }

    async fn read(&self) -> Result<Position, LedgerError> {
        let (spot, perp, loan): (f64, f64, f64) =
            sqlx::query_as("SELECT spot_qty, perp_qty, loan_usdt FROM bot_state WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(Position {
            spot: to_decimal(spot),
            perp: to_decimal(perp),
            loan: to_decimal(loan),
        })
    }

    async fn write(&self, position: &Position) -> Result<(), LedgerError> {
        sqlx::query("UPDATE bot_state SET spot_qty = ?1, perp_qty = ?2, loan_usdt = ?3 WHERE id = 1")
            .bind(to_real(position.spot))
            .bind(to_real(position.perp))
            .bind(to_real(position.loan))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Equity reference ──────────────────────────────────────────────────────

    pub async fn equity_reference(&self) -> Result<Option<EquityRef>, LedgerError> {
        let _held = self.gate.lock().await;
        let row: Option<(f64, i64)> =
            sqlx::query_as("SELECT equity_usd, observed_ms FROM equity_ref WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(equity, ms)| EquityRef {
            equity:      to_decimal(equity),
            observed_at: Utc.timestamp_millis_opt(ms).single().unwrap_or_default(),
        }))
    }

    pub async fn save_equity_reference(&self, equity: Decimal) -> Result<EquityRef, LedgerError> {
        let _held = self.gate.lock().await;
        let observed_at = Utc::now();
        sqlx::query(
            "INSERT INTO equity_ref (id, equity_usd, observed_ms) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET equity_usd = excluded.equity_usd, observed_ms = excluded.observed_ms",
        )
        .bind(to_real(equity))
        .bind(observed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(EquityRef { equity, observed_at })
    }
}

fn to_decimal(real: f64) -> Decimal {
    Decimal::from_f64(real).unwrap_or_default().normalize()
}

fn to_real(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
