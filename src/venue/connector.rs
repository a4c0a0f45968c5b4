//! Venue connector capability.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{Balances, MarketInfo, OrderAck};
use crate::error::VenueError;
use crate::orderbook::OrderBook;
use crate::trading::{OrderParams, OrderState};

/// Operations the engine needs from a trading venue.
///
/// Adapters map venue error codes into [`VenueError`] variants; free-text rejections
/// go through [`VenueError::from_venue_message`].
#[async_trait]
pub trait VenueConnector: Send + Sync {
    /// Venue id.
    fn venue(&self) -> &str;

    /// Market metadata for every listed pair.
    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, VenueError>;

    /// Order book for one symbol, at most `depth` levels per side.
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError>;

    /// Full account snapshot.
    async fn fetch_balance(&self) -> Result<Balances, VenueError>;

    /// Free amount of one currency.
    ///
    /// Venues with a native single-asset endpoint override this.
    async fn fetch_free_balance(&self, currency: &str) -> Result<Decimal, VenueError> {
        Ok(self.fetch_balance().await?.free(currency))
    }

    /// Place a limit order.
    async fn create_order(&self, params: &OrderParams) -> Result<OrderAck, VenueError>;

    /// Cancel an order.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError>;

    /// Current state of an order.
    async fn fetch_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderState, VenueError>;

    /// Look an order up by the client id it was placed with.
    async fn find_order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, VenueError>;
}

/// Shared connector handle.
pub type SharedConnector = Arc<dyn VenueConnector>;
