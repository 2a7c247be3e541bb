//! # gateway::exchange
//!
//! The narrow port every executor, monitor and the rebalancer uses to reach
//! the exchange. [`Gateway`](super::Gateway) is the production implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use super::types::{num, opt_num};
use crate::error::GatewayError;

// ─── Endpoints ────────────────────────────────────────────────────────────────

pub const PATH_BALANCE: &str = "/api/v5/account/balance";
pub const PATH_TICKER: &str = "/api/v5/market/ticker";
pub const PATH_RISK_STATE: &str = "/api/v5/account/risk-state";
pub const PATH_MAX_LOAN: &str = "/api/v5/account/max-loan";
pub const PATH_MAX_AVAIL_SIZE: &str = "/api/v5/account/max-avail-size";
pub const PATH_ORDER: &str = "/api/v5/trade/order";
pub const PATH_CLOSE_POSITION: &str = "/api/v5/trade/close-position";
pub const PATH_BORROW_REPAY: &str = "/api/v5/account/borrow-repay";

/// Settlement currency of the carry.
pub const QUOTE_CCY: &str = "USDT";

/// `availBuy` / `availSell` for a new order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeLimit {
    pub buy:  Decimal,
    pub sell: Decimal,
}

// ─── Port ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Signed GET; returns the envelope's `data` array.
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, GatewayError>;

    /// Signed POST. Application-level rejections are logged and alerted but
    /// not raised: the caller gets `data` back as-is.
    async fn post(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError>;

    /// Strict POST: any non-success envelope or per-item code raises
    /// [`GatewayError::OrderRejected`].
    async fn post_order(&self, path: &str, payload: &Value) -> Result<Vec<Value>, GatewayError>;

    // ── Typed reads ───────────────────────────────────────────────────────────

    /// Total account equity in USD.
    async fn equity(&self) -> Result<Decimal, GatewayError> {
        let data = self.get(PATH_BALANCE, &[("ccy", QUOTE_CCY)]).await?;
        Ok(data.first().map(|d| num(d, "totalEq")).unwrap_or_default())
    }

    /// Last traded price. Errors when the ticker is empty.
    async fn last_price(&self, inst_id: &str) -> Result<Decimal, GatewayError> {
        let data = self.get(PATH_TICKER, &[("instId", inst_id)]).await?;
        data.first()
            .and_then(|d| opt_num(d, "last"))
            .ok_or_else(|| GatewayError::InvalidRequest(format!("no ticker data for {inst_id}")))
    }

    async fn risk_ratio(&self) -> Result<Decimal, GatewayError> {
        let data = self.get(PATH_RISK_STATE, &[]).await?;
        Ok(data.first().map(|d| num(d, "riskRatio")).unwrap_or_default())
    }

    /// Current borrow interest rate (APR) for `ccy`.
    async fn loan_rate(&self, ccy: &str) -> Result<Decimal, GatewayError> {
        let data = self.get(PATH_MAX_LOAN, &[("ccy", ccy)]).await?;
        data.first()
            .and_then(|d| opt_num(d, "interestRate"))
            .ok_or_else(|| GatewayError::InvalidRequest(format!("no loan rate for {ccy}")))
    }

    /// Remaining loan quota, `None` when the exchange does not report one.
    async fn max_loan(&self, ccy: &str) -> Result<Option<Decimal>, GatewayError> {
        let data = self.get(PATH_MAX_LOAN, &[("ccy", ccy)]).await?;
        Ok(data.first().and_then(|d| opt_num(d, "maxLoan")))
    }

    async fn max_avail_size(&self, inst_id: &str, td_mode: &str) -> Result<Option<SizeLimit>, GatewayError> {
        let data = self
            .get(PATH_MAX_AVAIL_SIZE, &[("instId", inst_id), ("tdMode", td_mode)])
            .await?;
        Ok(data.first().map(|d| SizeLimit {
            buy:  num(d, "availBuy"),
            sell: num(d, "availSell"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockExchange;
    use serde_json::json;

    #[tokio::test]
    async fn typed_reads_parse_string_numbers() {
        let ex = MockExchange::new()
            .with_get(PATH_BALANCE, json!([{"totalEq":"1234.5"}]))
            .with_get(PATH_TICKER, json!([{"last":"0.1002"}]))
            .with_get(PATH_RISK_STATE, json!([{"riskRatio":"0.42"}]))
            .with_get(PATH_MAX_LOAN, json!([{"interestRate":"0.065","maxLoan":""}]));

        assert_eq!(ex.equity().await.unwrap(), Decimal::new(12345, 1));
        assert_eq!(ex.last_price("DOGE-USDT").await.unwrap(), Decimal::new(1002, 4));
        assert_eq!(ex.risk_ratio().await.unwrap(), Decimal::new(42, 2));
        assert_eq!(ex.loan_rate("USDT").await.unwrap(), Decimal::new(65, 3));
        assert_eq!(ex.max_loan("USDT").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_ticker_is_an_error() {
        let ex = MockExchange::new();
        assert!(ex.last_price("DOGE-USDT").await.is_err());
        assert_eq!(ex.equity().await.unwrap(), Decimal::ZERO);
        assert_eq!(ex.max_avail_size("DOGE-USDT", "cash").await.unwrap(), None);
    }
}
