//! Venue data types shared by every connector.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::orderbook::OrderBook;

/// Market metadata as published by a venue.
///
/// Precision and minimums are optional because venues omit them; the graph builder
/// rejects pairs where they are missing rather than guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Instrument symbol (`BASE/QUOTE`).
    pub symbol: String,
    /// Base currency.
    pub base: String,
    /// Quote currency.
    pub quote: String,
    /// Whether the pair is trading.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Taker fee as a fraction of the received amount.
    #[serde(default)]
    pub taker_fee: Decimal,
    /// Decimal places allowed for amounts.
    #[serde(default)]
    pub amount_precision: Option<u32>,
    /// Decimal places allowed for prices.
    #[serde(default)]
    pub price_precision: Option<u32>,
    /// Minimum base amount.
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    /// Minimum quote notional.
    #[serde(default)]
    pub min_notional: Option<Decimal>,
    /// Minimum price; the price tick when absent.
    #[serde(default)]
    pub min_price: Option<Decimal>,
}

fn default_active() -> bool {
    true
}

impl MarketInfo {
    /// Symbol for a base/quote pair.
    pub fn symbol_for(base: &str, quote: &str) -> String {
        format!("{}/{}", base.to_uppercase(), quote.to_uppercase())
    }

    /// Trading rules, or the reason the pair is unusable.
    pub fn rules(&self) -> Result<TradingRules, GraphError> {
        let (Some(amount_precision), Some(price_precision)) =
            (self.amount_precision, self.price_precision)
        else {
            return Err(GraphError::MissingPrecision {
                symbol: self.symbol.clone(),
            });
        };

        let (Some(min_amount), Some(min_notional)) = (self.min_amount, self.min_notional) else {
            return Err(GraphError::MissingLimits {
                symbol: self.symbol.clone(),
            });
        };

        let min_price = self
            .min_price
            .unwrap_or_else(|| Decimal::new(1, price_precision));

        Ok(TradingRules {
            amount_precision,
            price_precision,
            min_amount,
            min_notional,
            min_price,
        })
    }
}

/// Venue trading rules for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingRules {
    /// Decimal places allowed for amounts.
    pub amount_precision: u32,
    /// Decimal places allowed for prices.
    pub price_precision: u32,
    /// Minimum base amount.
    pub min_amount: Decimal,
    /// Minimum quote notional.
    pub min_notional: Decimal,
    /// Minimum price.
    pub min_price: Decimal,
}

impl TradingRules {
    /// Floor an amount to the venue's amount precision.
    pub fn floor_amount(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.amount_precision, RoundingStrategy::ToZero)
    }

    /// Round a price down to the venue's price precision.
    pub fn floor_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_precision, RoundingStrategy::ToZero)
    }

    /// Round a price up to the venue's price precision.
    pub fn ceil_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_precision, RoundingStrategy::AwayFromZero)
    }

    /// Check an order against the venue minimums.
    pub fn check(&self, amount: Decimal, price: Decimal) -> Result<(), String> {
        if price < self.min_price {
            return Err(format!("price {price} below minimum {}", self.min_price));
        }
        if amount < self.min_amount {
            return Err(format!("amount {amount} below minimum {}", self.min_amount));
        }
        let notional = amount * price;
        if notional < self.min_notional {
            return Err(format!(
                "notional {notional} below minimum {}",
                self.min_notional
            ));
        }
        Ok(())
    }
}

/// Account balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    /// Free (available) amounts by currency.
    pub free: HashMap<String, Decimal>,
    /// Total amounts (free plus locked) by currency.
    pub total: HashMap<String, Decimal>,
}

impl Balances {
    /// Free amount of a currency; zero when not listed.
    pub fn free(&self, currency: &str) -> Decimal {
        self.free.get(currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Total amount of a currency; zero when not listed.
    pub fn total(&self, currency: &str) -> Decimal {
        self.total.get(currency).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAck {
    /// Venue order id.
    pub order_id: String,
    /// Client order id sent with the order.
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
}

/// Everything the graph builder needs from one venue.
#[derive(Debug, Clone)]
pub struct VenueSnapshot {
    /// Venue id.
    pub venue: String,
    /// Market metadata.
    pub markets: Vec<MarketInfo>,
    /// Books by symbol.
    pub books: HashMap<String, OrderBook>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> MarketInfo {
        MarketInfo {
            symbol: "ETH/BTC".to_string(),
            base: "ETH".to_string(),
            quote: "BTC".to_string(),
            active: true,
            taker_fee: dec!(0.001),
            amount_precision: Some(3),
            price_precision: Some(5),
            min_amount: Some(dec!(0.01)),
            min_notional: Some(dec!(0.0001)),
            min_price: None,
        }
    }

    #[test]
    fn rules_require_metadata() {
        let rules = market().rules().unwrap();
        assert_eq!(rules.min_price, dec!(0.00001));

        let missing = MarketInfo {
            price_precision: None,
            ..market()
        };
        assert!(matches!(missing.rules(), Err(GraphError::MissingPrecision { .. })));

        let missing = MarketInfo {
            min_notional: None,
            ..market()
        };
        assert!(matches!(missing.rules(), Err(GraphError::MissingLimits { .. })));
    }

    #[test]
    fn rounding_follows_precision() {
        let rules = market().rules().unwrap();
        assert_eq!(rules.floor_amount(dec!(1.23456)), dec!(1.234));
        assert_eq!(rules.floor_price(dec!(0.0512345)), dec!(0.05123));
        assert_eq!(rules.ceil_price(dec!(0.0512341)), dec!(0.05124));
    }

    #[test]
    fn check_enforces_minimums() {
        let rules = market().rules().unwrap();
        assert!(rules.check(dec!(1), dec!(0.05)).is_ok());
        assert!(rules.check(dec!(0.001), dec!(0.05)).is_err());
        assert!(rules.check(dec!(0.01), dec!(0.001)).is_err());
        assert!(rules.check(dec!(1), dec!(0)).is_err());
    }
}
