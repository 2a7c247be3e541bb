//! # engine::borrow
//!
//! **Borrow Executor**: margin loan in the quote currency.
//!
//! `repay_all` is idempotent: with no loan on the ledger it reports
//! "nothing to repay" without touching the exchange.

use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;

use super::executor::{ensure_positive, Action, ActionOutcome, ExecContext};
use crate::error::ExecError;
use crate::gateway::exchange::{PATH_BORROW_REPAY, QUOTE_CCY};

pub struct BorrowExecutor {
    ctx:  ExecContext,
    /// Serialises repay attempts so a loan is never repaid twice.
    gate: Mutex<()>,
}

impl BorrowExecutor {
    pub fn new(ctx: ExecContext) -> Self {
        Self { ctx, gate: Mutex::new(()) }
    }

    pub async fn borrow(&self, amount: Decimal) -> Result<ActionOutcome, ExecError> {
        let result = self.try_borrow(amount).await;
        self.ctx.report(Action::Borrow, result).await
    }

    pub async fn repay_all(&self) -> Result<ActionOutcome, ExecError> {
        let _held = self.gate.lock().await;
        let result = self.try_repay_all().await;
        self.ctx.report(Action::Repay, result).await
    }

    async fn try_borrow(&self, amount: Decimal) -> Result<ActionOutcome, ExecError> {
        // ── 1. Validate ───────────────────────────────────────────────────────
        ensure_positive(Action::Borrow, amount)?;

        // ── 2. Quota ──────────────────────────────────────────────────────────
        if let Some(available) = self.ctx.exchange.max_loan(QUOTE_CCY).await? {
            if amount > available {
                return Err(ExecError::InsufficientQuota { requested: amount, available });
            }
        }

        // ── 3. Borrow ─────────────────────────────────────────────────────────
        let payload = json!({
            "ccy":  QUOTE_CCY,
            "amt":  amount.to_string(),
            "side": "borrow",
        });
        info!(amount = %amount, ccy = QUOTE_CCY, "🚀 [BORROW] Requesting loan");
        self.ctx
            .exchange
            .post_order(PATH_BORROW_REPAY, &payload)
            .await
            .map_err(|e| ExecError::from(e).into_borrow_rejection())?;

        // ── 4. Ledger ─────────────────────────────────────────────────────────
        self.ctx
            .store
            .apply(|mut p| {
                p.loan += amount;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount })
    }

    async fn try_repay_all(&self) -> Result<ActionOutcome, ExecError> {
        let loan = self.ctx.store.get().await?.loan;
        if loan <= Decimal::ZERO {
            return Ok(ActionOutcome::NothingToDo { reason: "nothing to repay" });
        }

        // Blank `amt` repays the full outstanding balance including interest.
        let payload = json!({
            "ccy":  QUOTE_CCY,
            "side": "repay",
            "amt":  "",
        });
        info!(loan = %loan, ccy = QUOTE_CCY, "🚀 [BORROW] Repaying full loan");
        self.ctx
            .exchange
            .post_order(PATH_BORROW_REPAY, &payload)
            .await
            .map_err(|e| ExecError::from(e).into_repay_rejection())?;

        self.ctx
            .store
            .apply(|mut p| {
                p.loan = Decimal::ZERO;
                p
            })
            .await?;

        Ok(ActionOutcome::Executed { amount: loan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::exchange::PATH_MAX_LOAN;
    use crate::testkit::{position, Harness, MockExchange};
    use serde_json::json;

    #[tokio::test]
    async fn borrow_adds_to_loan() {
        let h = Harness::new(MockExchange::new().with_get(PATH_MAX_LOAN, json!([{"maxLoan":"5000"}])))
            .await
            .with_position(0, 0, 100)
            .await;
        let borrow = BorrowExecutor::new(h.ctx.clone());

        let outcome = borrow.borrow(Decimal::from(2000)).await.unwrap();
        assert!(outcome.executed());
        assert_eq!(h.position().await, position(0, 0, 2100));

        let posts = h.exchange.posts_to(PATH_BORROW_REPAY);
        assert_eq!(posts[0].body, json!({"ccy":"USDT","amt":"2000","side":"borrow"}));
        assert!(h.alerts.contains("BORROW 2000"));
    }

    #[tokio::test]
    async fn borrow_over_quota_never_posts() {
        let h = Harness::new(MockExchange::new().with_get(PATH_MAX_LOAN, json!([{"maxLoan":"10"}]))).await;
        let borrow = BorrowExecutor::new(h.ctx.clone());

        let err = borrow.borrow(Decimal::from(20)).await.unwrap_err();
        assert!(matches!(err, ExecError::InsufficientQuota { .. }));
        assert!(h.exchange.posts().is_empty());
        assert!(h.alerts.contains("BORROW failed"));
    }

    #[tokio::test]
    async fn rejected_borrow_leaves_ledger_alone() {
        let h = Harness::new(MockExchange::new().reject(PATH_BORROW_REPAY, "59301", "Exceeds limit")).await;
        let borrow = BorrowExecutor::new(h.ctx.clone());

        let err = borrow.borrow(Decimal::from(20)).await.unwrap_err();
        assert!(matches!(err, ExecError::BorrowRejected { ref code, .. } if code == "59301"));
        assert_eq!(h.position().await, position(0, 0, 0));
    }

    #[tokio::test]
    async fn repay_all_clears_loan_then_becomes_noop() {
        let h = Harness::new(MockExchange::new()).await.with_position(1000, -1000, 500).await;
        let borrow = BorrowExecutor::new(h.ctx.clone());

        let first = borrow.repay_all().await.unwrap();
        assert_eq!(first, ActionOutcome::Executed { amount: Decimal::from(500) });
        assert_eq!(h.position().await, position(1000, -1000, 0));

        let second = borrow.repay_all().await.unwrap();
        assert_eq!(second, ActionOutcome::NothingToDo { reason: "nothing to repay" });
        assert_eq!(h.exchange.posts_to(PATH_BORROW_REPAY).len(), 1);
    }

    #[tokio::test]
    async fn rejected_repay_is_typed() {
        let h = Harness::new(MockExchange::new().reject(PATH_BORROW_REPAY, "51008", "no funds"))
            .await
            .with_position(0, 0, 500)
            .await;
        let borrow = BorrowExecutor::new(h.ctx.clone());

        let err = borrow.repay_all().await.unwrap_err();
        assert!(matches!(err, ExecError::RepayRejected { .. }));
        assert_eq!(h.position().await.loan, Decimal::from(500));
    }
}
