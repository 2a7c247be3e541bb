//! # metrics
//!
//! Gauges scraped at `GET /metrics` in Prometheus text format, held in a
//! private `prometheus::Registry`.
//!
//! | Gauge            | Set by                  |
//! |------------------|-------------------------|
//! | `funding_rate`   | funding monitor         |
//! | `risk_ratio`     | risk monitor            |
//! | `liq_gap`        | liquidation monitor     |
//! | `delta_abs`      | rebalancer              |
//! | `account_equity` | equity guard            |

use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use rust_decimal::{prelude::ToPrimitive, Decimal};

/// Ledger and exchange values are `Decimal`; the exporter speaks f64.
pub trait SetDecimal {
    fn set_decimal(&self, value: Decimal);
}

impl SetDecimal for Gauge {
    fn set_decimal(&self, value: Decimal) {
        self.set(value.to_f64().unwrap_or(f64::NAN));
    }
}

pub struct Metrics {
    registry:           Registry,
    pub funding_rate:   Gauge,
    pub risk_ratio:     Gauge,
    pub liq_gap:        Gauge,
    pub delta_abs:      Gauge,
    pub account_equity: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            funding_rate:   register(&registry, "funding_rate", "Next funding rate of the swap leg")?,
            risk_ratio:     register(&registry, "risk_ratio", "Account risk ratio")?,
            liq_gap:        register(&registry, "liq_gap", "Relative distance of mark price to liquidation price")?,
            delta_abs:      register(&registry, "delta_abs", "Normalised delta |spot + perp| / spot")?,
            account_equity: register(&registry, "account_equity", "Total account equity in USD")?,
            registry,
        })
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let gauge = Gauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
