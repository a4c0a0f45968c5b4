//! Venue module: the connector boundary.
//!
//! This module handles:
//! - Venue data types (markets, trading rules, balances)
//! - The `VenueConnector` capability every adapter implements
//! - Rate limiting and transient retries
//! - Paper and mock venues

pub mod connector;
pub mod mock;
pub mod paper;
pub mod retry;
pub mod types;

pub use connector::{SharedConnector, VenueConnector};
pub use paper::{PaperSnapshot, PaperVenue};
pub use retry::{RetryPolicy, RetryingConnector};
pub use types::{Balances, MarketInfo, OrderAck, TradingRules, VenueSnapshot};
