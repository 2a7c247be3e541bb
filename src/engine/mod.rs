//! # engine
//!
//! ```text
//!   monitors ─┐                 ┌─▶ borrow ─┐
//!             ├─▶ unwinder ─────┤           ├─▶ Exchange (signed REST)
//!   rebalance ┘                 └─▶ perp ───┤
//!   bootstrap ──▶ borrow, spot, perp        └─▶ StateStore::apply
//! ```

pub mod bootstrap;
pub mod borrow;
pub mod executor;
pub mod monitors;
pub mod perp;
pub mod rebalance;
pub mod spot;
pub mod unwind;
