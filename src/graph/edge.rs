//! Directed conversion edges between currencies.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::orderbook::PriceLevel;
use crate::trading::Side;
use crate::venue::{MarketInfo, TradingRules};

/// One way to turn `from` into `to` on a venue.
///
/// Both directions of a pair are separate edges: selling base uses the best bid,
/// buying base uses the best ask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketEdge {
    /// Venue id.
    pub venue: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Currency spent.
    pub from: String,
    /// Currency received.
    pub to: String,
    /// Order side needed to traverse the edge.
    pub side: Side,
    /// Units of `to` per unit of `from`, before fees.
    pub rate: f64,
    /// Taker fee as a fraction.
    pub fee_fraction: f64,
    /// `-ln(rate * (1 - fee_fraction))`.
    pub weight: f64,
    /// Book price the rate was derived from.
    pub price: Decimal,
    /// Top-of-book liquidity, in `from` units.
    pub liquidity: Decimal,
    /// Venue trading rules for the pair.
    pub rules: TradingRules,
}

impl MarketEdge {
    /// Calculate the logarithmic weight: `-ln(rate * (1 - fee))`.
    ///
    /// Returns infinity for non-positive effective rates.
    pub fn calculate_weight(rate: f64, fee_fraction: f64) -> f64 {
        let effective_rate = rate * (1.0 - fee_fraction);
        if !effective_rate.is_finite() || effective_rate <= 0.0 {
            f64::INFINITY
        } else {
            -effective_rate.ln()
        }
    }

    /// Base → quote edge priced at the best bid.
    pub fn sell(venue: &str, market: &MarketInfo, rules: TradingRules, bid: PriceLevel) -> Option<Self> {
        let rate = bid.price.to_f64()?;
        Self::build(venue, market, rules, Side::Sell, rate, bid.price, bid.size)
    }

    /// Quote → base edge priced at `1 / best ask`.
    pub fn buy(venue: &str, market: &MarketInfo, rules: TradingRules, ask: PriceLevel) -> Option<Self> {
        let rate = 1.0 / ask.price.to_f64()?;
        Self::build(venue, market, rules, Side::Buy, rate, ask.price, ask.size * ask.price)
    }

    fn build(
        venue: &str,
        market: &MarketInfo,
        rules: TradingRules,
        side: Side,
        rate: f64,
        price: Decimal,
        liquidity: Decimal,
    ) -> Option<Self> {
        let fee_fraction = market.taker_fee.to_f64()?;
        let weight = Self::calculate_weight(rate, fee_fraction);
        if !weight.is_finite() {
            warn!(venue, symbol = %market.symbol, rate, fee_fraction, "Skipping edge with invalid rate");
            return None;
        }

        let (from, to) = match side {
            Side::Sell => (market.base.clone(), market.quote.clone()),
            Side::Buy => (market.quote.clone(), market.base.clone()),
        };

        Some(Self {
            venue: venue.to_string(),
            symbol: market.symbol.clone(),
            from,
            to,
            side,
            rate,
            fee_fraction,
            weight,
            price,
            liquidity,
            rules,
        })
    }

    /// Rate after fees.
    pub fn effective_rate(&self) -> f64 {
        self.rate * (1.0 - self.fee_fraction)
    }

    /// Stable identity: venue, symbol and side.
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.venue, self.symbol, self.side)
    }

    /// Base amount quoted at the top of the book.
    pub fn top_base_amount(&self) -> Decimal {
        match self.side {
            Side::Sell => self.liquidity,
            Side::Buy if self.price > Decimal::ZERO => self.liquidity / self.price,
            Side::Buy => Decimal::ZERO,
        }
    }

    /// Whether the top of book alone could fill a minimum-sized order.
    pub fn meets_venue_minimums(&self) -> bool {
        self.rules.check(self.top_base_amount(), self.price).is_ok()
    }
}

impl fmt::Display for MarketEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} ({} {} @ {} on {})",
            self.from, self.to, self.side, self.symbol, self.price, self.venue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::mock::MockMarketBuilder;
    use rust_decimal_macros::dec;

    #[test]
    fn weight_is_negative_log_of_effective_rate() {
        let w = MarketEdge::calculate_weight(1.02, 0.0);
        assert!((w + 1.02f64.ln()).abs() < 1e-12);
        assert!(MarketEdge::calculate_weight(1.0, 0.0).abs() < 1e-12);
        assert_eq!(MarketEdge::calculate_weight(0.0, 0.0), f64::INFINITY);
        assert_eq!(MarketEdge::calculate_weight(1.0, 1.0), f64::INFINITY);
    }

    #[test]
    fn directions_use_their_own_side_of_the_book() {
        let market = MockMarketBuilder::new("ETH", "BTC").fee(dec!(0.001)).build();
        let rules = market.info.rules().unwrap();

        let sell = MarketEdge::sell("v", &market.info, rules, PriceLevel::new(dec!(0.05), dec!(10))).unwrap();
        assert_eq!((sell.from.as_str(), sell.to.as_str()), ("ETH", "BTC"));
        assert_eq!(sell.liquidity, dec!(10));
        assert!((sell.rate - 0.05).abs() < 1e-12);

        let buy = MarketEdge::buy("v", &market.info, rules, PriceLevel::new(dec!(0.0625), dec!(8))).unwrap();
        assert_eq!((buy.from.as_str(), buy.to.as_str()), ("BTC", "ETH"));
        assert_eq!(buy.liquidity, dec!(0.5));
        assert!((buy.rate - 16.0).abs() < 1e-9);
        assert_eq!(buy.top_base_amount(), dec!(8));
        assert_eq!(buy.id(), "v:ETH/BTC:buy");
    }

    #[test]
    fn minimum_check_uses_top_of_book() {
        let market = MockMarketBuilder::new("ETH", "BTC")
            .rules(3, 5, dec!(0.1), dec!(0.001))
            .build();
        let rules = market.info.rules().unwrap();

        let thin = MarketEdge::sell("v", &market.info, rules, PriceLevel::new(dec!(0.05), dec!(0.01))).unwrap();
        assert!(!thin.meets_venue_minimums());

        let deep = MarketEdge::sell("v", &market.info, rules, PriceLevel::new(dec!(0.05), dec!(1))).unwrap();
        assert!(deep.meets_venue_minimums());
    }
}
