//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level, in quote units.
    pub price: Decimal,
    /// Total base amount available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// L2 order book for one instrument on one venue.
///
/// Venues that only publish a ticker are represented by a single level per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    /// Instrument symbol (`BASE/QUOTE`).
    pub symbol: String,
    /// Bid levels sorted by price descending.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    /// When this book was fetched.
    #[serde(skip, default = "OffsetDateTime::now_utc")]
    pub updated_at: OffsetDateTime,
}

impl OrderBook {
    /// Create a book from unsorted levels.
    pub fn new(symbol: impl Into<String>, mut bids: Vec<PriceLevel>, mut asks: Vec<PriceLevel>) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            symbol: symbol.into(),
            bids,
            asks,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Book built from a best bid/ask ticker.
    pub fn from_ticker(
        symbol: impl Into<String>,
        bid: PriceLevel,
        ask: PriceLevel,
    ) -> Self {
        Self::new(symbol, vec![bid], vec![ask])
    }

    /// Keep only the first `depth` levels per side.
    pub fn truncated(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }

    /// Best bid level with a positive price and size.
    pub fn top_bid(&self) -> Option<PriceLevel> {
        self.bids
            .first()
            .copied()
            .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
    }

    /// Best ask level with a positive price and size.
    pub fn top_ask(&self) -> Option<PriceLevel> {
        self.asks
            .first()
            .copied()
            .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.top_bid().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.top_ask().map(|l| l.price)
    }
}

/// Result of walking one side of the book.
#[derive(Debug, Clone, PartialEq)]
pub struct FillInfo {
    /// Base amount that can be filled.
    pub filled_size: Decimal,
    /// Quote amount exchanged.
    pub total_cost: Decimal,
    /// Volume-weighted average price.
    pub vwap: Decimal,
    /// Worst price touched.
    pub worst_price: Decimal,
}

impl FillInfo {
    /// Fill that matched nothing.
    pub fn empty() -> Self {
        Self {
            filled_size: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            vwap: Decimal::ZERO,
            worst_price: Decimal::ZERO,
        }
    }

    /// Whether anything was matched.
    pub fn is_empty(&self) -> bool {
        self.filled_size.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn book_sorts_levels() {
        let book = OrderBook::new(
            "ETH/BTC",
            vec![
                PriceLevel::new(dec!(0.047), dec!(100)),
                PriceLevel::new(dec!(0.048), dec!(50)),
            ],
            vec![
                PriceLevel::new(dec!(0.051), dec!(100)),
                PriceLevel::new(dec!(0.050), dec!(50)),
            ],
        );

        assert_eq!(book.best_bid(), Some(dec!(0.048)));
        assert_eq!(book.best_ask(), Some(dec!(0.050)));
    }

    #[test]
    fn zero_sized_top_is_not_a_quote() {
        let book = OrderBook::from_ticker(
            "ETH/BTC",
            PriceLevel::new(dec!(0.048), dec!(0)),
            PriceLevel::new(dec!(0.050), dec!(10)),
        );
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), Some(dec!(0.050)));
    }

    #[test]
    fn book_deserializes_without_timestamp() {
        let book: OrderBook = serde_json::from_str(
            r#"{"symbol":"BTC/USDT","bids":[{"price":"100","size":"2"}],"asks":[{"price":"101","size":"3"}]}"#,
        )
        .unwrap();
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.asks[0].size, dec!(3));
    }
}
