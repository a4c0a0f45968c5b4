//! Mock venue for unit testing.
//!
//! Wraps a [`PaperVenue`] and adds failure injection: queued errors for reads and
//! order placement, placement latency, and orders that never fill.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::connector::VenueConnector;
use super::paper::PaperVenue;
use super::types::{Balances, MarketInfo, OrderAck};
use crate::error::VenueError;
use crate::orderbook::{OrderBook, PriceLevel};
use crate::trading::{OrderParams, OrderState};

/// Configuration for mock venue behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether to fail market listing.
    pub fail_markets: bool,
    /// Whether to fail order book requests.
    pub fail_order_book: bool,
    /// Whether to fail account snapshots.
    pub fail_balance: bool,
    /// Whether to fail single-asset balance requests.
    pub fail_free_balance: bool,
    /// Simulated latency for reads in milliseconds.
    pub latency_ms: u64,
    /// Simulated latency for order placement in milliseconds.
    pub create_latency_ms: u64,
    /// Place orders only after the placement latency elapses.
    pub drop_timed_out_orders: bool,
    /// Accept orders without matching them.
    pub leave_open: bool,
}

/// A market listing plus its book.
#[derive(Debug, Clone)]
pub struct MockMarket {
    /// Market metadata.
    pub info: MarketInfo,
    /// Current book.
    pub book: OrderBook,
}

/// Mock venue for testing.
#[derive(Debug)]
pub struct MockVenue {
    config: MockConfig,
    inner: PaperVenue,
    read_errors: Mutex<VecDeque<VenueError>>,
    order_errors: Mutex<VecDeque<VenueError>>,
    lost_acks: Mutex<VecDeque<VenueError>>,
    submitted: Mutex<Vec<OrderParams>>,
    read_calls: AtomicUsize,
}

impl MockVenue {
    /// Create a new mock venue with default configuration.
    pub fn new(venue: impl Into<String>) -> Self {
        Self::with_config(venue, MockConfig::default())
    }

    /// Create a mock venue with custom configuration.
    pub fn with_config(venue: impl Into<String>, config: MockConfig) -> Self {
        Self {
            config,
            inner: PaperVenue::new(venue),
            read_errors: Mutex::new(VecDeque::new()),
            order_errors: Mutex::new(VecDeque::new()),
            lost_acks: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            read_calls: AtomicUsize::new(0),
        }
    }

    /// List a market.
    pub fn add_market(&self, market: MockMarket) {
        self.inner.add_market(market.info, market.book);
    }

    /// Replace a book; resting orders that cross it fill.
    pub fn set_book(&self, book: OrderBook) {
        self.inner.set_book(book);
    }

    /// Set the free balance of a currency.
    pub fn set_balance(&self, currency: &str, amount: Decimal) {
        self.inner.set_balance(currency, amount);
    }

    /// Fail the next read call with `error`.
    pub fn push_read_error(&self, error: VenueError) {
        self.read_errors.lock().push_back(error);
    }

    /// Fail the next order placement with `error`.
    pub fn push_order_error(&self, error: VenueError) {
        self.order_errors.lock().push_back(error);
    }

    /// Accept the next order placement, then report `error` to the caller.
    pub fn push_lost_ack(&self, error: VenueError) {
        self.lost_acks.lock().push_back(error);
    }

    /// Every order placement attempted, in order.
    pub fn submitted_orders(&self) -> Vec<OrderParams> {
        self.submitted.lock().clone()
    }

    /// Number of order placements attempted.
    pub fn order_attempts(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Number of orders the venue accepted.
    pub fn orders_placed(&self) -> usize {
        self.inner.order_count()
    }

    /// Number of read calls made.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    async fn before_read(&self, fail: bool, what: &str) -> Result<(), VenueError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        let queued = self.read_errors.lock().pop_front();
        if let Some(error) = queued {
            return Err(error);
        }
        if fail {
            return Err(VenueError::Network(format!("mock {what} failure")));
        }
        Ok(())
    }

    fn place(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        let ack = if self.config.leave_open {
            self.inner.rest_order(params)
        } else {
            self.inner.submit(params)
        }?;
        match self.lost_acks.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(ack),
        }
    }
}

#[async_trait]
impl VenueConnector for MockVenue {
    fn venue(&self) -> &str {
        self.inner.venue()
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, VenueError> {
        self.before_read(self.config.fail_markets, "markets").await?;
        self.inner.fetch_markets().await
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError> {
        self.before_read(self.config.fail_order_book, "order book").await?;
        self.inner.fetch_order_book(symbol, depth).await
    }

    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        self.before_read(self.config.fail_balance, "balance").await?;
        self.inner.fetch_balance().await
    }

    async fn fetch_free_balance(&self, currency: &str) -> Result<Decimal, VenueError> {
        self.before_read(self.config.fail_free_balance, "free balance").await?;
        self.inner.fetch_free_balance(currency).await
    }

    async fn create_order(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        self.submitted.lock().push(params.clone());
        let queued = self.order_errors.lock().pop_front();
        if let Some(error) = queued {
            return Err(error);
        }

        if self.config.create_latency_ms == 0 {
            return self.place(params);
        }

        let latency = Duration::from_millis(self.config.create_latency_ms);
        if self.config.drop_timed_out_orders {
            tokio::time::sleep(latency).await;
            self.place(params)
        } else {
            let ack = self.place(params);
            tokio::time::sleep(latency).await;
            ack
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn fetch_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderState, VenueError> {
        self.inner.fetch_order_status(symbol, order_id).await
    }

    async fn find_order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, VenueError> {
        self.inner.find_order_by_client_id(symbol, client_order_id).await
    }
}

/// Builder for mock markets with common defaults.
pub struct MockMarketBuilder {
    info: MarketInfo,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl MockMarketBuilder {
    /// Create a new builder for `base/quote`: 8 decimal precision, tiny minimums, no fee.
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            info: MarketInfo {
                symbol: MarketInfo::symbol_for(base, quote),
                base: base.to_uppercase(),
                quote: quote.to_uppercase(),
                active: true,
                taker_fee: Decimal::ZERO,
                amount_precision: Some(8),
                price_precision: Some(8),
                min_amount: Some(Decimal::new(1, 8)),
                min_notional: Some(Decimal::new(1, 8)),
                min_price: None,
            },
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Set the taker fee.
    pub fn fee(mut self, fee: Decimal) -> Self {
        self.info.taker_fee = fee;
        self
    }

    /// Set precision and minimums.
    pub fn rules(
        mut self,
        amount_precision: u32,
        price_precision: u32,
        min_amount: Decimal,
        min_notional: Decimal,
    ) -> Self {
        self.info.amount_precision = Some(amount_precision);
        self.info.price_precision = Some(price_precision);
        self.info.min_amount = Some(min_amount);
        self.info.min_notional = Some(min_notional);
        self
    }

    /// Drop precision metadata.
    pub fn without_precision(mut self) -> Self {
        self.info.amount_precision = None;
        self.info.price_precision = None;
        self
    }

    /// Mark the market inactive.
    pub fn inactive(mut self) -> Self {
        self.info.active = false;
        self
    }

    /// Add a bid level.
    pub fn bid(mut self, level: PriceLevel) -> Self {
        self.bids.push(level);
        self
    }

    /// Add an ask level.
    pub fn ask(mut self, level: PriceLevel) -> Self {
        self.asks.push(level);
        self
    }

    /// Build the mock market.
    pub fn build(self) -> MockMarket {
        let book = OrderBook::new(self.info.symbol.clone(), self.bids, self.asks);
        MockMarket {
            info: self.info,
            book,
        }
    }
}
