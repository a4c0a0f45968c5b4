//! Fill walking and book aggregates.

use rust_decimal::Decimal;
use tracing::instrument;

use super::types::{FillInfo, OrderBook, PriceLevel};

/// Walk the ask book buying up to `amount` base at prices `<= limit`.
///
/// Partial fills are allowed (IOC semantics); the untouched remainder is dropped.
#[instrument(level = "trace", skip(asks), fields(amount = %amount, limit = %limit))]
pub fn fill_buy(asks: &[PriceLevel], amount: Decimal, limit: Decimal) -> FillInfo {
    walk(asks, amount, |price| price <= limit)
}

/// Walk the bid book selling up to `amount` base at prices `>= limit`.
#[instrument(level = "trace", skip(bids), fields(amount = %amount, limit = %limit))]
pub fn fill_sell(bids: &[PriceLevel], amount: Decimal, limit: Decimal) -> FillInfo {
    walk(bids, amount, |price| price >= limit)
}

fn walk(levels: &[PriceLevel], amount: Decimal, accept: impl Fn(Decimal) -> bool) -> FillInfo {
    if amount <= Decimal::ZERO {
        return FillInfo::empty();
    }

    let mut remaining = amount;
    let mut total_cost = Decimal::ZERO;
    let mut worst_price = Decimal::ZERO;

    for level in levels {
        if remaining.is_zero() || !accept(level.price) {
            break;
        }

        let fill_size = remaining.min(level.size);
        total_cost += fill_size * level.price;
        remaining -= fill_size;
        worst_price = level.price;
    }

    let filled_size = amount - remaining;
    if filled_size.is_zero() {
        return FillInfo::empty();
    }

    FillInfo {
        filled_size,
        total_cost,
        vwap: total_cost / filled_size,
        worst_price,
    }
}

/// Calculate the mid price from best bid and ask.
pub fn mid_price(book: &OrderBook) -> Option<Decimal> {
    match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
        _ => None,
    }
}

/// Total base amount quoted on one side.
pub fn total_size(levels: &[PriceLevel]) -> Decimal {
    levels.iter().map(|l| l.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eth_btc_asks() -> Vec<PriceLevel> {
        vec![
            PriceLevel::new(dec!(0.050), dec!(2)),
            PriceLevel::new(dec!(0.051), dec!(3)),
            PriceLevel::new(dec!(0.053), dec!(10)),
        ]
    }

    #[test]
    fn buy_inside_top_level() {
        let result = fill_buy(&eth_btc_asks(), dec!(1.5), dec!(0.052));

        assert_eq!(result.filled_size, dec!(1.5));
        assert_eq!(result.total_cost, dec!(0.075));
        assert_eq!(result.vwap, dec!(0.05));
        assert_eq!(result.worst_price, dec!(0.05));
    }

    #[test]
    fn buy_crosses_levels_up_to_limit() {
        let result = fill_buy(&eth_btc_asks(), dec!(8), dec!(0.052));

        // 2 @ 0.050 + 3 @ 0.051; the 0.053 level is above the limit
        assert_eq!(result.filled_size, dec!(5));
        assert_eq!(result.total_cost, dec!(0.253));
        assert_eq!(result.worst_price, dec!(0.051));

        assert!(fill_buy(&eth_btc_asks(), dec!(1), dec!(0.049)).is_empty());
    }

    #[test]
    fn sell_walks_bids_down_to_limit() {
        let bids = vec![
            PriceLevel::new(dec!(99.5), dec!(0.4)),
            PriceLevel::new(dec!(99.0), dec!(1)),
            PriceLevel::new(dec!(97.0), dec!(5)),
        ];
        let result = fill_sell(&bids, dec!(1), dec!(98));

        assert_eq!(result.filled_size, dec!(1));
        assert_eq!(result.total_cost, dec!(99.2));
        assert_eq!(result.worst_price, dec!(99.0));
    }

    #[test]
    fn non_positive_amount_fills_nothing() {
        assert!(fill_sell(&eth_btc_asks(), Decimal::ZERO, dec!(0.01)).is_empty());
    }

    #[test]
    fn mid_needs_both_sides() {
        let book = OrderBook::new(
            "BTC/USDT",
            vec![PriceLevel::new(dec!(99), dec!(1))],
            vec![PriceLevel::new(dec!(101), dec!(1))],
        );
        assert_eq!(mid_price(&book), Some(dec!(100)));
        assert_eq!(total_size(&book.asks), dec!(1));

        let one_sided = OrderBook::new("BTC/USDT", vec![], vec![PriceLevel::new(dec!(101), dec!(1))]);
        assert_eq!(mid_price(&one_sided), None);
    }
}
