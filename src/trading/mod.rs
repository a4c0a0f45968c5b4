//! Trading module for order types and order lifecycle.
//!
//! This module handles:
//! - Order types and creation
//! - Placement with timeout re-checks and settlement polling

pub mod execution;
pub mod order;

pub use execution::{
    cancel_and_recheck, settle_order, submit_with_timeout, wait_for_terminal_order,
    DEFAULT_ORDER_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
pub use order::{OrderParams, OrderState, OrderStatus, Side, TimeInForce};
