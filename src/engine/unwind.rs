//! # engine::unwind
//!
//! Close the short, then repay the loan. Several monitors may decide to
//! unwind around the same moment; holding the perp leg runs those requests
//! one after another, and every later caller finds the legs already flat.
//! The rebalancer takes the same leg lock, so it never re-shorts halfway
//! through an unwind.

use std::sync::Arc;

use tracing::warn;

use super::borrow::BorrowExecutor;
use super::executor::ActionOutcome;
use super::perp::PerpExecutor;
use crate::error::ExecError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnwindReport {
    pub close: ActionOutcome,
    pub repay: ActionOutcome,
}

impl UnwindReport {
    /// Did this call change anything on the exchange?
    pub fn acted(&self) -> bool {
        self.close.executed() || self.repay.executed()
    }
}

pub struct Unwinder {
    perp:   Arc<PerpExecutor>,
    borrow: Arc<BorrowExecutor>,
}

impl Unwinder {
    pub fn new(perp: Arc<PerpExecutor>, borrow: Arc<BorrowExecutor>) -> Self {
        Self { perp, borrow }
    }

    /// The loan is only repaid once the close went through.
    pub async fn unwind(&self, reason: &str) -> Result<UnwindReport, ExecError> {
        let _held = self.perp.lock_leg().await;
        warn!(reason, "‼️ [UNWIND] Closing legs");
        let close = self.perp.close_all().await?;
        let repay = self.borrow.repay_all().await?;
        Ok(UnwindReport { close, repay })
    }
}
