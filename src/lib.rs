//! Multi-hop currency cycle arbitrage engine.
//!
//! Every venue's markets become a directed graph of currencies whose edges carry
//! `-ln(rate * (1 - fee))`. A negative-weight cycle is a loop of swaps that ends
//! with more of the start currency than it began with:
//!
//! ```text
//! USDT -> BTC   buy  @ 100      x 0.01
//! BTC  -> ETH   buy  @ 0.05     x 20
//! ETH  -> USDT  sell @ 5.2      x 5.2
//! ─────────────────────────────────────
//! product 1.04 > 1  (weight sum -0.0392)
//! ```
//!
//! Cycles are found with Bellman-Ford, filtered against a blacklist and profit
//! thresholds, then executed hop by hop against live balances. Residue the last hop
//! cannot clear is handed to a protective mirror order.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`venue`]: Venue connector trait, retry wrapper, paper and mock venues
//! - [`orderbook`]: Order book types and price helpers
//! - [`graph`]: Market graph construction
//! - [`arbitrage`]: Cycle detection, filtering and the scanner
//! - [`balance`]: Free balance lookup
//! - [`execution`]: Swap plans, the executor, mirror guard and supervisor
//! - [`trading`]: Order types and order lifecycle helpers
//! - [`telemetry`]: Structured run history
//! - [`engine`]: The scan-and-execute loop
//! - [`api`]: HTTP API for health and status
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod metrics;
pub mod orderbook;
pub mod telemetry;
pub mod trading;
pub mod utils;
pub mod venue;

pub use config::Config;
pub use error::{BotError, Result};
