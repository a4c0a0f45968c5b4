//! Paper venue: an in-memory matching simulator used for dry runs.
//!
//! Orders match against the stored books at book prices, consume the liquidity they
//! take, and charge the taker fee on the received currency. GTC orders that do not
//! cross rest with their funds locked and match when a later book crosses them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::connector::VenueConnector;
use super::types::{Balances, MarketInfo, OrderAck};
use crate::error::{BotError, VenueError};
use crate::orderbook::{fill_buy, fill_sell, FillInfo, OrderBook, PriceLevel};
use crate::trading::{OrderParams, OrderState, OrderStatus, Side, TimeInForce};

/// One venue in a paper snapshot file.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperVenueSpec {
    /// Venue id.
    pub venue: String,
    /// Listed markets.
    pub markets: Vec<MarketInfo>,
    /// Books, one per symbol.
    #[serde(default)]
    pub books: Vec<OrderBook>,
    /// Starting free balances.
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,
}

/// Paper snapshot file: `{"venues": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperSnapshot {
    /// Venues to simulate.
    pub venues: Vec<PaperVenueSpec>,
}

impl PaperSnapshot {
    /// Read a snapshot from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Build one paper venue per entry.
    pub fn into_venues(self) -> Vec<PaperVenue> {
        self.venues.into_iter().map(PaperVenue::from_spec).collect()
    }
}

/// In-memory simulated venue.
#[derive(Debug)]
pub struct PaperVenue {
    venue: String,
    markets: DashMap<String, MarketInfo>,
    books: DashMap<String, OrderBook>,
    free: DashMap<String, Decimal>,
    locked: DashMap<String, Decimal>,
    orders: DashMap<String, OrderState>,
    resting: DashMap<String, OrderParams>,
    client_ids: DashMap<String, String>,
    next_id: AtomicU64,
}

impl PaperVenue {
    /// Create an empty venue.
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            markets: DashMap::new(),
            books: DashMap::new(),
            free: DashMap::new(),
            locked: DashMap::new(),
            orders: DashMap::new(),
            resting: DashMap::new(),
            client_ids: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a venue from a snapshot entry.
    pub fn from_spec(spec: PaperVenueSpec) -> Self {
        let venue = Self::new(spec.venue);
        for market in spec.markets {
            venue.markets.insert(market.symbol.clone(), market);
        }
        for book in spec.books {
            venue.books.insert(book.symbol.clone(), book);
        }
        for (currency, amount) in spec.balances {
            venue.set_balance(&currency, amount);
        }
        venue
    }

    /// List a market with its current book.
    pub fn add_market(&self, market: MarketInfo, book: OrderBook) {
        self.books.insert(market.symbol.clone(), book);
        self.markets.insert(market.symbol.clone(), market);
    }

    /// Overwrite the free balance of a currency.
    pub fn set_balance(&self, currency: &str, amount: Decimal) {
        self.free.insert(currency.to_string(), amount);
    }

    /// Replace a book and match resting orders against it.
    pub fn set_book(&self, book: OrderBook) {
        let symbol = book.symbol.clone();
        self.books.insert(symbol.clone(), book);
        self.match_resting(&symbol);
    }

    /// Number of orders accepted so far.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Place an order and match it immediately.
    pub fn submit(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        self.place(params, true)
    }

    /// Place an order without matching it, leaving it open on the book.
    pub fn rest_order(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        self.place(params, false)
    }

    fn free_amount(&self, currency: &str) -> Decimal {
        self.free.get(currency).map(|v| *v).unwrap_or(Decimal::ZERO)
    }

    fn credit(&self, currency: &str, amount: Decimal) {
        *self.free.entry(currency.to_string()).or_insert(Decimal::ZERO) += amount;
    }

    fn debit(&self, currency: &str, amount: Decimal) {
        *self.free.entry(currency.to_string()).or_insert(Decimal::ZERO) -= amount;
    }

    fn lock(&self, currency: &str, amount: Decimal) {
        self.debit(currency, amount);
        *self.locked.entry(currency.to_string()).or_insert(Decimal::ZERO) += amount;
    }

    fn release(&self, currency: &str, amount: Decimal) {
        *self.locked.entry(currency.to_string()).or_insert(Decimal::ZERO) -= amount;
        self.credit(currency, amount);
    }

    fn market(&self, symbol: &str) -> Result<MarketInfo, VenueError> {
        self.markets
            .get(symbol)
            .map(|m| m.clone())
            .ok_or_else(|| VenueError::UnknownSymbol {
                venue: self.venue.clone(),
                symbol: symbol.to_string(),
            })
    }

    /// Currency and amount an order spends.
    fn spend(market: &MarketInfo, side: Side, amount: Decimal, price: Decimal) -> (String, Decimal) {
        match side {
            Side::Sell => (market.base.clone(), amount),
            Side::Buy => (market.quote.clone(), amount * price),
        }
    }

    #[instrument(level = "debug", skip(self, params), fields(venue = %self.venue, symbol = %params.symbol))]
    fn place(&self, params: &OrderParams, immediate: bool) -> Result<OrderAck, VenueError> {
        let market = self.market(&params.symbol)?;
        if !market.active {
            return Err(VenueError::Rejected {
                venue: self.venue.clone(),
                reason: format!("{} is not trading", params.symbol),
            });
        }
        params.validate().map_err(|reason| VenueError::Precision {
            venue: self.venue.clone(),
            reason,
        })?;
        if let Ok(rules) = market.rules() {
            rules
                .check(params.amount, params.price)
                .map_err(|reason| VenueError::Precision {
                    venue: self.venue.clone(),
                    reason,
                })?;
        }

        let (currency, needed) = Self::spend(&market, params.side, params.amount, params.price);
        let available = self.free_amount(&currency);
        if available < needed {
            return Err(VenueError::InsufficientPosition {
                venue: self.venue.clone(),
                reason: format!("insufficient {currency}: need {needed}, have {available}"),
            });
        }

        let order_id = format!("{}-{}", self.venue, self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = OrderState {
            order_id: order_id.clone(),
            client_order_id: Some(params.client_order_id.clone()),
            symbol: params.symbol.clone(),
            side: params.side,
            status: OrderStatus::Pending,
            amount: params.amount,
            filled: Decimal::ZERO,
            average_price: None,
            fee: Decimal::ZERO,
            fee_currency: None,
        };

        if immediate {
            let fill = self.take(&params.symbol, params.side, params.amount, params.price);
            self.apply_fill(&market, params, &fill, &mut state, false);
        }

        if state.filled >= params.amount {
            state.status = OrderStatus::Filled;
        } else if immediate && params.tif == TimeInForce::Ioc {
            state.status = OrderStatus::Canceled;
        } else {
            state.status = OrderStatus::Open;
            let (currency, remaining) =
                Self::spend(&market, params.side, state.remaining(), params.price);
            self.lock(&currency, remaining);
            self.resting.insert(order_id.clone(), params.clone());
        }

        debug!(
            order_id = %order_id,
            status = %state.status,
            filled = %state.filled,
            "Paper order processed"
        );

        self.client_ids
            .insert(params.client_order_id.clone(), order_id.clone());
        self.orders.insert(order_id.clone(), state);

        Ok(OrderAck {
            order_id,
            client_order_id: params.client_order_id.clone(),
            symbol: params.symbol.clone(),
        })
    }

    /// Match against the stored book and consume the matched liquidity.
    fn take(&self, symbol: &str, side: Side, amount: Decimal, limit: Decimal) -> FillInfo {
        let Some(mut book) = self.books.get_mut(symbol) else {
            return FillInfo::empty();
        };

        match side {
            Side::Sell => {
                let fill = fill_sell(&book.bids, amount, limit);
                consume(&mut book.bids, fill.filled_size);
                fill
            }
            Side::Buy => {
                let fill = fill_buy(&book.asks, amount, limit);
                consume(&mut book.asks, fill.filled_size);
                fill
            }
        }
    }

    fn apply_fill(
        &self,
        market: &MarketInfo,
        params: &OrderParams,
        fill: &FillInfo,
        state: &mut OrderState,
        from_locked: bool,
    ) {
        if fill.is_empty() {
            return;
        }

        let fee_rate = market.taker_fee;
        match params.side {
            Side::Sell => {
                if from_locked {
                    self.release(&market.base, fill.filled_size);
                }
                self.debit(&market.base, fill.filled_size);
                let fee = fill.total_cost * fee_rate;
                self.credit(&market.quote, fill.total_cost - fee);
                state.fee += fee;
                state.fee_currency = Some(market.quote.clone());
            }
            Side::Buy => {
                if from_locked {
                    self.release(&market.quote, fill.filled_size * params.price);
                }
                self.debit(&market.quote, fill.total_cost);
                let fee = fill.filled_size * fee_rate;
                self.credit(&market.base, fill.filled_size - fee);
                state.fee += fee;
                state.fee_currency = Some(market.base.clone());
            }
        }

        let notional = state.filled_notional() + fill.total_cost;
        state.filled += fill.filled_size;
        state.average_price = Some(notional / state.filled);
    }

    fn match_resting(&self, symbol: &str) {
        let candidates: Vec<(String, OrderParams)> = self
            .resting
            .iter()
            .filter(|entry| entry.value().symbol == symbol)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let Ok(market) = self.market(symbol) else {
            return;
        };

        for (order_id, params) in candidates {
            let Some(mut state) = self.orders.get(&order_id).map(|s| s.clone()) else {
                continue;
            };

            let fill = self.take(symbol, params.side, state.remaining(), params.price);
            if fill.is_empty() {
                continue;
            }
            self.apply_fill(&market, &params, &fill, &mut state, true);

            if state.filled >= state.amount {
                state.status = OrderStatus::Filled;
                self.resting.remove(&order_id);
                info!(venue = %self.venue, order_id = %order_id, "Resting paper order filled");
            }
            self.orders.insert(order_id, state);
        }
    }
}

/// Remove `amount` of base from the front of a book side.
fn consume(levels: &mut Vec<PriceLevel>, mut amount: Decimal) {
    for level in levels.iter_mut() {
        if amount.is_zero() {
            break;
        }
        let taken = amount.min(level.size);
        level.size -= taken;
        amount -= taken;
    }
    levels.retain(|l| l.size > Decimal::ZERO);
}

#[async_trait]
impl VenueConnector for PaperVenue {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, VenueError> {
        let mut markets: Vec<MarketInfo> = self.markets.iter().map(|m| m.value().clone()).collect();
        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(markets)
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError> {
        self.books
            .get(symbol)
            .map(|b| b.clone().truncated(depth))
            .ok_or_else(|| VenueError::UnknownSymbol {
                venue: self.venue.clone(),
                symbol: symbol.to_string(),
            })
    }

    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        let free: HashMap<String, Decimal> = self
            .free
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let mut total = free.clone();
        for entry in self.locked.iter() {
            *total.entry(entry.key().clone()).or_insert(Decimal::ZERO) += *entry.value();
        }
        Ok(Balances { free, total })
    }

    async fn fetch_free_balance(&self, currency: &str) -> Result<Decimal, VenueError> {
        Ok(self.free_amount(currency))
    }

    async fn create_order(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        self.submit(params)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), VenueError> {
        let Some(mut state) = self.orders.get(order_id).map(|s| s.clone()) else {
            return Err(VenueError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        };

        if let Some((_, params)) = self.resting.remove(order_id) {
            let market = self.market(&params.symbol)?;
            let (currency, remaining) =
                Self::spend(&market, params.side, state.remaining(), params.price);
            self.release(&currency, remaining);
            state.status = OrderStatus::Canceled;
            self.orders.insert(order_id.to_string(), state);
            debug!(venue = %self.venue, order_id = %order_id, "Paper order cancelled");
        }
        Ok(())
    }

    async fn fetch_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderState, VenueError> {
        self.orders
            .get(order_id)
            .map(|s| s.clone())
            .ok_or_else(|| VenueError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn find_order_by_client_id(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, VenueError> {
        let Some(order_id) = self.client_ids.get(client_order_id).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.orders.get(&order_id).map(|s| s.clone()))
    }
}
