//! Order types and creation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy base with quote.
    #[strum(to_string = "buy", serialize = "BUY")]
    Buy,
    /// Sell base for quote.
    #[strum(to_string = "sell", serialize = "SELL")]
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Immediate-or-cancel: fill what's available, cancel the rest.
    #[default]
    #[strum(serialize = "IOC", serialize = "ioc")]
    Ioc,
    /// Good-till-cancelled: rests on the book until filled or cancelled.
    #[strum(serialize = "GTC", serialize = "gtc")]
    Gtc,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderParams {
    /// Instrument symbol (`BASE/QUOTE`).
    pub symbol: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price in quote units.
    pub price: Decimal,
    /// Order amount in base units.
    pub amount: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
    /// Caller-assigned id used to find the order after an ambiguous placement.
    pub client_order_id: String,
}

impl OrderParams {
    /// Create a new buy order.
    pub fn buy(symbol: impl Into<String>, price: Decimal, amount: Decimal) -> Self {
        Self::new(symbol, Side::Buy, price, amount)
    }

    /// Create a new sell order.
    pub fn sell(symbol: impl Into<String>, price: Decimal, amount: Decimal) -> Self {
        Self::new(symbol, Side::Sell, price, amount)
    }

    /// Create an IOC limit order with a fresh client order id.
    pub fn new(symbol: impl Into<String>, side: Side, price: Decimal, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            amount,
            tif: TimeInForce::Ioc,
            client_order_id: Uuid::new_v4().to_string(),
        }
    }

    /// Set time-in-force.
    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Quote value of the order at its limit price.
    pub fn notional(&self) -> Decimal {
        self.price * self.amount
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("symbol is required".to_string());
        }
        if self.price <= Decimal::ZERO {
            return Err("price must be positive".to_string());
        }
        if self.amount <= Decimal::ZERO {
            return Err("amount must be positive".to_string());
        }
        Ok(())
    }
}

/// Order status reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order accepted, not yet on the book.
    #[strum(serialize = "pending", serialize = "PENDING")]
    Pending,
    /// Order is resting on the book.
    #[strum(serialize = "open", serialize = "OPEN", serialize = "live")]
    Open,
    /// Order is fully filled.
    #[strum(serialize = "filled", serialize = "FILLED", serialize = "closed")]
    Filled,
    /// Order was cancelled (possibly after a partial fill).
    #[strum(serialize = "canceled", serialize = "cancelled", serialize = "CANCELED", serialize = "CANCELLED")]
    Canceled,
    /// Order was rejected.
    #[strum(serialize = "rejected", serialize = "REJECTED")]
    Rejected,
    /// Order expired.
    #[strum(serialize = "expired", serialize = "EXPIRED")]
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Order state summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderState {
    /// Venue order ID.
    pub order_id: String,
    /// Client order ID, when the venue echoes it.
    pub client_order_id: Option<String>,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Current status.
    pub status: OrderStatus,
    /// Requested base amount.
    pub amount: Decimal,
    /// Filled base amount.
    pub filled: Decimal,
    /// Average fill price, if anything filled.
    pub average_price: Option<Decimal>,
    /// Fee charged.
    pub fee: Decimal,
    /// Currency the fee was charged in.
    pub fee_currency: Option<String>,
}

impl OrderState {
    /// Remaining base amount.
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled).max(Decimal::ZERO)
    }

    /// Whether the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the full amount was filled.
    pub fn is_filled(&self) -> bool {
        self.status.is_filled() || (self.amount > Decimal::ZERO && self.filled >= self.amount)
    }

    /// Quote value of the filled part.
    pub fn filled_notional(&self) -> Decimal {
        self.average_price
            .map(|p| p * self.filled)
            .unwrap_or(Decimal::ZERO)
    }
}
