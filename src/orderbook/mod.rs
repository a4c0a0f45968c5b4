//! Order book module for market data.
//!
//! This module handles:
//! - Order book types and data structures
//! - Fill walking and mid price calculations

pub mod aggregator;
pub mod types;

pub use aggregator::{fill_buy, fill_sell, mid_price};
pub use types::{FillInfo, OrderBook, PriceLevel};
