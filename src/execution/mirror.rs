//! Last-hop dust protection.
//!
//! When the final hop leaves a remainder that is not worth chasing with another
//! taker order, the remainder is offered as a resting limit order near mid. The
//! guard watches it and re-emits it closer to the entry price when its TTL expires
//! and the market moved in its favour, never crossing the protective price.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::plan::Hop;
use crate::error::MirrorError;
use crate::orderbook::mid_price;
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::trading::{
    cancel_and_recheck, submit_with_timeout, OrderParams, OrderState, Side, TimeInForce,
    DEFAULT_ORDER_TIMEOUT,
};
use crate::venue::{TradingRules, VenueConnector};

/// Mirror guard settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    /// Time an emission may rest before it can be re-emitted.
    pub ttl: Duration,
    /// Offset from mid for the limit price.
    pub safety_margin: Decimal,
    /// Offset from entry capping re-emitted prices.
    pub entry_offset: Decimal,
    /// Worst acceptable deviation from entry.
    pub protective_offset: Decimal,
    /// Maximum re-emissions.
    pub max_reemits: u32,
    /// Interval between checks.
    pub check_interval: Duration,
    /// Monitoring stops after this long; the order is left resting.
    pub max_lifetime: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            safety_margin: Decimal::new(1, 3),
            entry_offset: Decimal::new(2, 3),
            protective_offset: Decimal::new(1, 2),
            max_reemits: 3,
            check_interval: Duration::from_secs(1),
            max_lifetime: Duration::from_secs(600),
        }
    }
}

/// Mirror order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MirrorStatus {
    /// Resting on the book.
    Open,
    /// Fully filled.
    Filled,
    /// Re-emits or lifetime used up; left resting.
    Exhausted,
    /// Closed by the venue without filling.
    Closed,
    /// Cancelled on operator request.
    CancelledByOperator,
}

/// A resting dust order under protection.
#[derive(Debug, Clone)]
pub struct MirrorOrder {
    /// Owning plan.
    pub plan_id: String,
    /// Venue id.
    pub venue: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Base amount still to fill.
    pub amount: Decimal,
    /// Price the last hop was planned at.
    pub entry_price: Decimal,
    /// Mid at the last emission.
    pub reference_mid: Decimal,
    /// Current limit price.
    pub limit_price: Decimal,
    /// Bound the limit price never crosses.
    pub protective_price: Decimal,
    /// Current venue order id.
    pub order_id: String,
    /// First emission time.
    pub created_at: Instant,
    /// Earliest re-emission time for the current order.
    pub ttl_deadline: Instant,
    /// Re-emissions so far.
    pub reemit_count: u32,
    /// Re-emission cap.
    pub max_reemits: u32,
    /// Lifecycle status.
    pub status: MirrorStatus,
    /// Final states of orders replaced by re-emission.
    pub closed: Vec<OrderState>,
    /// Last observed state of the current order.
    pub current: Option<OrderState>,
    rules: TradingRules,
    cancel_generation: u64,
}

impl MirrorOrder {
    /// Every order state that may carry fills.
    pub fn fills(&self) -> impl Iterator<Item = &OrderState> {
        self.closed.iter().chain(self.current.iter())
    }

    /// Base amount filled across emissions.
    pub fn filled(&self) -> Decimal {
        self.fills().map(|s| s.filled).sum()
    }

    /// Plan annotation describing where an unfilled order ended up.
    ///
    /// `None` once the order is filled.
    pub fn outcome_note(&self) -> Option<String> {
        let prefix = format!("mirror order {} on {}", self.order_id, self.symbol);
        match self.status {
            MirrorStatus::Filled => None,
            MirrorStatus::Open | MirrorStatus::Exhausted => Some(format!(
                "{prefix} {}, left resting at {} for {}",
                self.status, self.limit_price, self.amount
            )),
            MirrorStatus::Closed => Some(format!(
                "{prefix} closed by the venue, {} unfilled and back in the free balance",
                self.amount
            )),
            MirrorStatus::CancelledByOperator => Some(format!(
                "{prefix} cancelled by operator, {} unfilled and back in the free balance",
                self.amount
            )),
        }
    }
}

/// Places and watches mirror orders.
#[derive(Debug)]
pub struct MirrorGuard {
    config: MirrorConfig,
    telemetry: TelemetryRecorder,
    cancel_tx: watch::Sender<u64>,
}

impl MirrorGuard {
    /// Create a guard.
    pub fn new(config: MirrorConfig, telemetry: TelemetryRecorder) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self {
            config,
            telemetry,
            cancel_tx,
        }
    }

    /// Guard settings.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Ask every monitored mirror order to cancel.
    pub fn cancel_all(&self) {
        self.cancel_tx.send_modify(|generation| *generation += 1);
    }

    /// First emission: `mid * (1 - safety)` for sells, `mid * (1 + safety)` for buys,
    /// held on the safe side of the protective price.
    pub fn initial_price(&self, side: Side, mid: Decimal, entry: Decimal) -> Decimal {
        let target = match side {
            Side::Sell => mid * (Decimal::ONE - self.config.safety_margin),
            Side::Buy => mid * (Decimal::ONE + self.config.safety_margin),
        };
        self.bound(side, target, entry)
    }

    /// Re-emission: the less aggressive of the entry-offset price and the mid price.
    pub fn reemit_price(&self, side: Side, mid: Decimal, entry: Decimal) -> Decimal {
        let target = match side {
            Side::Sell => (entry * (Decimal::ONE + self.config.entry_offset))
                .min(mid * (Decimal::ONE - self.config.safety_margin)),
            Side::Buy => (entry * (Decimal::ONE - self.config.entry_offset))
                .max(mid * (Decimal::ONE + self.config.safety_margin)),
        };
        self.bound(side, target, entry)
    }

    /// `entry * (1 - offset)` for sells, `entry * (1 + offset)` for buys.
    pub fn protective_price(&self, side: Side, entry: Decimal) -> Decimal {
        match side {
            Side::Sell => entry * (Decimal::ONE - self.config.protective_offset),
            Side::Buy => entry * (Decimal::ONE + self.config.protective_offset),
        }
    }

    fn bound(&self, side: Side, target: Decimal, entry: Decimal) -> Decimal {
        let protective = self.protective_price(side, entry);
        match side {
            Side::Sell => target.max(protective),
            Side::Buy => target.min(protective),
        }
    }

    /// Round to the venue tick on the protective side and check venue minimums.
    fn terms(
        rules: &TradingRules,
        symbol: &str,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), MirrorError> {
        let price = match side {
            Side::Sell => rules.ceil_price(price),
            Side::Buy => rules.floor_price(price),
        };
        let amount = rules.floor_amount(amount);
        rules
            .check(amount, price)
            .map_err(|reason| MirrorError::NoValidPrice {
                symbol: symbol.to_string(),
                reason,
            })?;
        Ok((price, amount))
    }

    async fn mid(connector: &dyn VenueConnector, symbol: &str) -> Result<Decimal, MirrorError> {
        let book = connector.fetch_order_book(symbol, 1).await?;
        mid_price(&book).ok_or_else(|| MirrorError::NoMidPrice {
            symbol: symbol.to_string(),
        })
    }

    /// Place the first mirror order for `amount_in` units of the hop's `from` currency.
    #[instrument(skip(self, connector, hop), fields(venue = %hop.venue, symbol = %hop.symbol))]
    pub async fn open(
        &self,
        plan_id: &str,
        connector: &dyn VenueConnector,
        hop: &Hop,
        amount_in: Decimal,
    ) -> Result<MirrorOrder, MirrorError> {
        let mid = Self::mid(connector, &hop.symbol).await?;
        let price = self.initial_price(hop.side, mid, hop.price);
        let amount = match hop.side {
            Side::Sell => amount_in,
            Side::Buy if price > Decimal::ZERO => amount_in / price,
            Side::Buy => Decimal::ZERO,
        };
        let (price, amount) = Self::terms(&hop.rules, &hop.symbol, hop.side, price, amount)?;

        let params = OrderParams::new(hop.symbol.clone(), hop.side, price, amount)
            .with_tif(TimeInForce::Gtc);
        let ack = submit_with_timeout(connector, &params, DEFAULT_ORDER_TIMEOUT).await?;

        let now = Instant::now();
        info!(order_id = %ack.order_id, price = %price, amount = %amount, mid = %mid, "Mirror order placed");
        self.telemetry.record(TelemetryEvent::MirrorEmitted {
            plan_id: plan_id.to_string(),
            symbol: hop.symbol.clone(),
            price,
            reemit_count: 0,
        });

        Ok(MirrorOrder {
            plan_id: plan_id.to_string(),
            venue: hop.venue.clone(),
            symbol: hop.symbol.clone(),
            side: hop.side,
            amount,
            entry_price: hop.price,
            reference_mid: mid,
            limit_price: price,
            protective_price: self.protective_price(hop.side, hop.price),
            order_id: ack.order_id,
            created_at: now,
            ttl_deadline: now + self.config.ttl,
            reemit_count: 0,
            max_reemits: self.config.max_reemits,
            status: MirrorStatus::Open,
            closed: Vec::new(),
            current: None,
            rules: hop.rules,
            cancel_generation: *self.cancel_tx.borrow(),
        })
    }

    /// One check cycle. Re-emits at most once.
    pub async fn check_once(
        &self,
        order: &mut MirrorOrder,
        connector: &dyn VenueConnector,
        now: Instant,
    ) -> Result<MirrorStatus, MirrorError> {
        let state = connector
            .fetch_order_status(&order.symbol, &order.order_id)
            .await?;
        let done = state.is_filled();
        let closed = state.is_terminal();
        order.current = Some(state);

        if done {
            order.status = MirrorStatus::Filled;
            return Ok(order.status);
        }
        if closed {
            order.status = MirrorStatus::Closed;
            return Ok(order.status);
        }
        if now < order.ttl_deadline || order.reemit_count >= order.max_reemits {
            return Ok(order.status);
        }

        let mid = Self::mid(connector, &order.symbol).await?;
        let favourable = match order.side {
            Side::Sell => mid > order.reference_mid,
            Side::Buy => mid < order.reference_mid,
        };
        if !favourable {
            debug!(order_id = %order.order_id, mid = %mid, reference = %order.reference_mid, "TTL expired, mid not favourable");
            return Ok(order.status);
        }

        let final_state = cancel_and_recheck(connector, &order.symbol, &order.order_id).await?;
        let remaining = final_state.remaining();
        let filled = final_state.is_filled();
        order.current = None;
        order.closed.push(final_state);
        if filled || remaining <= Decimal::ZERO {
            order.status = MirrorStatus::Filled;
            return Ok(order.status);
        }

        let price = self.reemit_price(order.side, mid, order.entry_price);
        let (price, amount) = Self::terms(&order.rules, &order.symbol, order.side, price, remaining)?;
        let params = OrderParams::new(order.symbol.clone(), order.side, price, amount)
            .with_tif(TimeInForce::Gtc);
        let ack = submit_with_timeout(connector, &params, DEFAULT_ORDER_TIMEOUT).await?;

        order.order_id = ack.order_id;
        order.amount = amount;
        order.limit_price = price;
        order.reference_mid = mid;
        order.reemit_count += 1;
        order.ttl_deadline = now + self.config.ttl;

        info!(
            order_id = %order.order_id,
            price = %price,
            mid = %mid,
            reemit_count = order.reemit_count,
            "Mirror order re-emitted"
        );
        self.telemetry.record(TelemetryEvent::MirrorEmitted {
            plan_id: order.plan_id.clone(),
            symbol: order.symbol.clone(),
            price,
            reemit_count: order.reemit_count,
        });

        Ok(order.status)
    }

    /// Watch `order` until it fills, closes, is cancelled, or runs out of budget.
    #[instrument(skip(self, order, connector), fields(order_id = %order.order_id))]
    pub async fn monitor(
        &self,
        mut order: MirrorOrder,
        connector: &dyn VenueConnector,
    ) -> Result<MirrorOrder, MirrorError> {
        let mut cancel = self.cancel_tx.subscribe();
        let lifetime_end = order.created_at + self.config.max_lifetime;

        loop {
            if *cancel.borrow_and_update() != order.cancel_generation {
                warn!(order_id = %order.order_id, "Mirror order cancelled by operator");
                let state = cancel_and_recheck(connector, &order.symbol, &order.order_id).await?;
                order.current = Some(state);
                order.status = MirrorStatus::CancelledByOperator;
                return Ok(order);
            }

            tokio::select! {
                _ = sleep(self.config.check_interval) => {}
                changed = cancel.changed() => {
                    if changed.is_ok() {
                        continue;
                    }
                }
            }

            let now = Instant::now();
            match self.check_once(&mut order, connector, now).await? {
                MirrorStatus::Open => {}
                _ => return Ok(order),
            }

            let exhausted = order.reemit_count >= order.max_reemits && now >= order.ttl_deadline;
            if exhausted || now >= lifetime_end {
                info!(
                    order_id = %order.order_id,
                    reemit_count = order.reemit_count,
                    "Mirror budget spent, leaving order resting"
                );
                order.status = MirrorStatus::Exhausted;
                return Ok(order);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{OrderBook, PriceLevel};
    use crate::venue::mock::{MockConfig, MockMarketBuilder, MockVenue};
    use rust_decimal_macros::dec;

    fn guard(max_reemits: u32) -> MirrorGuard {
        MirrorGuard::new(
            MirrorConfig {
                ttl: Duration::from_secs(10),
                max_reemits,
                check_interval: Duration::from_millis(100),
                ..MirrorConfig::default()
            },
            TelemetryRecorder::null(),
        )
    }

    fn book(bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook::new(
            "ETH/USDT",
            vec![PriceLevel::new(bid, dec!(10))],
            vec![PriceLevel::new(ask, dec!(10))],
        )
    }

    fn venue() -> MockVenue {
        let venue = MockVenue::with_config(
            "mock",
            MockConfig {
                leave_open: true,
                ..MockConfig::default()
            },
        );
        venue.add_market(
            MockMarketBuilder::new("ETH", "USDT")
                .rules(4, 2, dec!(0.001), dec!(0.01))
                .bid(PriceLevel::new(dec!(99), dec!(10)))
                .ask(PriceLevel::new(dec!(101), dec!(10)))
                .build(),
        );
        venue.set_balance("ETH", dec!(1));
        venue
    }

    fn sell_hop() -> Hop {
        let market = MockMarketBuilder::new("ETH", "USDT")
            .rules(4, 2, dec!(0.001), dec!(0.01))
            .build();
        Hop {
            index: 2,
            venue: "mock".to_string(),
            symbol: "ETH/USDT".to_string(),
            side: Side::Sell,
            from: "ETH".to_string(),
            to: "USDT".to_string(),
            price: dec!(100),
            fee_fraction: Decimal::ZERO,
            rules: market.info.rules().unwrap(),
            amount_in: dec!(0.5),
            min_acceptable_out: Decimal::ZERO,
        }
    }

    #[test]
    fn prices_respect_protective_bound() {
        let guard = guard(3);

        assert_eq!(guard.initial_price(Side::Sell, dec!(100), dec!(100)), dec!(99.9));
        assert_eq!(guard.initial_price(Side::Sell, dec!(90), dec!(100)), dec!(99));
        assert_eq!(guard.initial_price(Side::Buy, dec!(100), dec!(100)), dec!(100.1));
        assert_eq!(guard.initial_price(Side::Buy, dec!(110), dec!(100)), dec!(101));

        assert_eq!(guard.reemit_price(Side::Sell, dec!(102), dec!(100)), dec!(100.2));
        assert_eq!(guard.reemit_price(Side::Buy, dec!(98), dec!(100)), dec!(99.8));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_ttl_with_favourable_move_reemits_once_per_check() {
        let venue = venue();
        let guard = guard(1);
        let mut order = guard.open("plan", &venue, &sell_hop(), dec!(0.5)).await.unwrap();
        assert_eq!(order.limit_price, dec!(99.9));
        assert_eq!(order.amount, dec!(0.5));

        venue.set_book(book(dec!(99.5), dec!(104.5)));
        let later = order.ttl_deadline + Duration::from_millis(1);

        guard.check_once(&mut order, &venue, later).await.unwrap();
        assert_eq!(order.reemit_count, 1);
        assert_eq!(order.limit_price, dec!(100.2));

        guard.check_once(&mut order, &venue, later).await.unwrap();
        assert_eq!(order.reemit_count, 1);

        venue.set_book(book(dec!(99.5), dec!(110.5)));
        let much_later = order.ttl_deadline + Duration::from_secs(1);
        let status = guard.check_once(&mut order, &venue, much_later).await.unwrap();
        assert_eq!(status, MirrorStatus::Open);
        assert_eq!(order.reemit_count, 1);
        assert!(order.reemit_count <= order.max_reemits);
    }

    #[tokio::test(start_paused = true)]
    async fn unfavourable_move_keeps_order() {
        let venue = venue();
        let guard = guard(3);
        let mut order = guard.open("plan", &venue, &sell_hop(), dec!(0.5)).await.unwrap();
        let first_id = order.order_id.clone();

        venue.set_book(book(dec!(97), dec!(99.8)));
        let later = order.ttl_deadline + Duration::from_millis(1);
        guard.check_once(&mut order, &venue, later).await.unwrap();

        assert_eq!(order.reemit_count, 0);
        assert_eq!(order.order_id, first_id);
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_book_fills_mirror() {
        let venue = venue();
        let guard = guard(3);
        let order = guard.open("plan", &venue, &sell_hop(), dec!(0.5)).await.unwrap();

        venue.set_book(book(dec!(100), dec!(101)));
        let order = guard.monitor(order, &venue).await.unwrap();

        assert_eq!(order.status, MirrorStatus::Filled);
        assert_eq!(order.filled(), dec!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn operator_cancel_stops_monitoring() {
        let venue = venue();
        let guard = guard(3);
        let order = guard.open("plan", &venue, &sell_hop(), dec!(0.5)).await.unwrap();

        guard.cancel_all();
        let order = guard.monitor(order, &venue).await.unwrap();
        assert_eq!(order.status, MirrorStatus::CancelledByOperator);

        let note = order.outcome_note().unwrap();
        assert!(note.contains("cancelled by operator"));
        assert!(!note.contains("resting"));
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_note_follows_status() {
        let venue = venue();
        let guard = guard(3);
        let mut order = guard.open("plan", &venue, &sell_hop(), dec!(0.5)).await.unwrap();

        order.status = MirrorStatus::Exhausted;
        let note = order.outcome_note().unwrap();
        assert!(note.contains(&format!(
            "left resting at {} for {}",
            order.limit_price, order.amount
        )));

        order.status = MirrorStatus::Closed;
        let note = order.outcome_note().unwrap();
        assert!(note.contains("closed by the venue"));
        assert!(!note.contains("resting"));

        order.status = MirrorStatus::Filled;
        assert_eq!(order.outcome_note(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dust_below_minimum_is_rejected() {
        let venue = venue();
        let guard = guard(3);

        let err = guard.open("plan", &venue, &sell_hop(), dec!(0.0001)).await.unwrap_err();
        assert!(matches!(err, MirrorError::NoValidPrice { .. }));
    }
}
