//! # config: read configuration from environment variables
//!
//! Credentials are mandatory; everything else has a typed default.

use std::{fmt, str::FromStr, time::Duration};

use rust_decimal::Decimal;

use crate::error::AuthError;

pub const DEFAULT_REST_URL: &str = "https://www.okx.com";
pub const DEFAULT_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/private";

// ─── Credentials ──────────────────────────────────────────────────────────────

/// Exchange API credentials. Immutable for the lifetime of the process.
#[derive(Clone)]
pub struct Credentials {
    pub key:        String,
    pub secret:     String,
    pub passphrase: String,
    /// Sends `x-simulated-trading: 1` on every REST call.
    pub simulated:  bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("simulated", &self.simulated)
            .finish_non_exhaustive()
    }
}

// ─── Thresholds ───────────────────────────────────────────────────────────────

/// Trigger levels for the monitors and the rebalancer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Thresholds {
    /// Next funding rate at or below this → unwind.
    pub funding_flip:     Decimal,
    /// Borrow APR at or above this → unwind.
    pub apr_exit:         Decimal,
    /// `(liq - mark) / mark` at or below this → unwind.
    pub liq_gap:          Decimal,
    /// Risk ratio that raises an emergency alert (no automatic action).
    pub risk_alert:       Decimal,
    /// Risk ratio after a liquidation unwind that triggers a partial spot sale.
    pub delever_risk:     Decimal,
    /// Share of the spot holding sold when de-leveraging.
    pub delever_fraction: Decimal,
    /// Normalised delta `|spot + perp| / spot` that triggers a rebalance.
    pub rebalance:        Decimal,
    /// Equity drawdown from the stored reference that raises an alert.
    pub equity_drawdown:  Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            funding_flip:     Decimal::new(1, 5),  // 0.00001
            apr_exit:         Decimal::new(8, 2),  // 0.08
            liq_gap:          Decimal::new(2, 3),  // 0.002
            risk_alert:       Decimal::new(9, 1),  // 0.9
            delever_risk:     Decimal::new(80, 2), // 0.80
            delever_fraction: Decimal::new(30, 2), // 0.30
            rebalance:        Decimal::new(1, 2),  // 0.01
            equity_drawdown:  Decimal::new(10, 2), // 0.10
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials:     Credentials,
    pub rest_url:        String,
    pub ws_url:          String,
    /// Spot instrument, e.g. `DOGE-USDT`.
    pub pair_spot:       String,
    /// Perpetual swap instrument, e.g. `DOGE-USDT-SWAP`.
    pub pair_swap:       String,
    pub thresholds:      Thresholds,
    pub apr_poll:        Duration,
    pub rebalance_every: Duration,
    pub equity_poll:     Duration,
    /// Cold start borrows `equity × leverage`.
    pub leverage:        Decimal,
    pub database_url:    String,
    /// `(token, chat_id)`: alerting is disabled when unset.
    pub telegram:        Option<(String, String)>,
    pub bind_addr:       String,
}

impl Config {
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let key = var("OKX_KEY");
        let secret = var("OKX_SECRET");
        let passphrase = var("OKX_PASS");

        let missing: Vec<&'static str> = [
            ("OKX_KEY", key.is_none()),
            ("OKX_SECRET", secret.is_none()),
            ("OKX_PASS", passphrase.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(key), Some(secret), Some(passphrase)) = (key, secret, passphrase) else {
            return Err(AuthError::Missing(missing));
        };

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            funding_flip:     parsed(&var, "FUNDING_FLIP_THRESHOLD", defaults.funding_flip),
            apr_exit:         parsed(&var, "APR_EXIT", defaults.apr_exit),
            liq_gap:          parsed(&var, "LIQ_THRESHOLD", defaults.liq_gap),
            risk_alert:       parsed(&var, "RISK_ALERT_RATIO", defaults.risk_alert),
            delever_risk:     parsed(&var, "DELEVER_RISK_RATIO", defaults.delever_risk),
            delever_fraction: parsed(&var, "DELEVER_FRACTION", defaults.delever_fraction),
            rebalance:        parsed(&var, "REBALANCE_THRESHOLD", defaults.rebalance),
            equity_drawdown:  parsed(&var, "EQUITY_DRAWDOWN_ALERT", defaults.equity_drawdown),
        };

        let telegram = match (var("TG_TOKEN"), var("TG_CHAT")) {
            (Some(token), Some(chat)) => Some((token, chat)),
            _ => None,
        };

        Ok(Self {
            credentials: Credentials {
                key,
                secret,
                passphrase,
                simulated: var("OKX_SIM").map(|v| v == "1").unwrap_or(true),
            },
            rest_url:        var("OKX_REST_URL").unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
            ws_url:          var("OKX_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            pair_spot:       var("PAIR_SPOT").unwrap_or_else(|| "DOGE-USDT".to_string()),
            pair_swap:       var("PAIR_SWAP").unwrap_or_else(|| "DOGE-USDT-SWAP".to_string()),
            thresholds,
            apr_poll:        Duration::from_secs(parsed(&var, "APR_POLL_SECS", 600)),
            rebalance_every: Duration::from_secs(parsed(&var, "REBALANCE_SECS", 60)),
            equity_poll:     Duration::from_secs(parsed(&var, "EQUITY_POLL_SECS", 300)),
            leverage:        parsed(&var, "LEVERAGE", Decimal::TWO),
            database_url:    var("DATABASE_URL").unwrap_or_else(|| "sqlite://state.db".to_string()),
            telegram,
            bind_addr:       var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:9090".to_string()),
        })
    }
}

fn parsed<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw = %raw, "Unparseable config value — using default");
            default
        }),
        None => default,
    }
}
