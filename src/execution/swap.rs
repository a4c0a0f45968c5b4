//! Hop-by-hop swap execution.
//!
//! The executor walks a [`SwapPlan`] strictly in order: size the hop from a fresh
//! balance read, place a limit order, settle it, and move on. Failures are handled
//! by error class. Nothing is ever reversed; an aborted plan reports where the
//! funds were left.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use super::mirror::{MirrorGuard, MirrorOrder};
use super::plan::{AbortReport, Hop, HopStatus, PlanState, SwapPlan};
use crate::arbitrage::blacklist::{Blacklist, BlacklistEntry};
use crate::arbitrage::Opportunity;
use crate::balance::BalanceProvider;
use crate::error::{ErrorClass, ExecutionError, HeldAmount, VenueError};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::trading::{settle_order, submit_with_timeout, OrderParams, OrderState, Side};
use crate::venue::{SharedConnector, VenueConnector};

/// Executor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Cap on the first hop's input.
    pub trade_ceiling: Option<Decimal>,
    /// Last-hop remainders below this fraction of the input go to the mirror guard.
    pub dust_threshold: Decimal,
    /// Pause after each settled hop before reading balances again.
    pub settle_delay: Duration,
    /// Placement and settlement timeout.
    pub order_timeout: Duration,
    /// Order status poll interval.
    pub poll_interval: Duration,
    /// Orders per hop before giving up.
    pub hop_max_attempts: u32,
    /// Reduction applied once after an insufficient-balance rejection.
    pub insufficient_retry_fraction: Decimal,
    /// Limit price offset from the book price.
    pub slippage_tolerance: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            trade_ceiling: None,
            dust_threshold: Decimal::new(2, 2),
            settle_delay: Duration::from_millis(250),
            order_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            hop_max_attempts: 3,
            insufficient_retry_fraction: Decimal::new(5, 3),
            slippage_tolerance: Decimal::new(3, 3),
        }
    }
}

/// Input for a hop given the free balance of its `from` currency.
///
/// Only the first hop is capped by the ceiling; later hops spend everything
/// the previous hop produced.
pub fn size_hop(index: usize, free: Decimal, ceiling: Option<Decimal>) -> Decimal {
    let free = free.max(Decimal::ZERO);
    match ceiling {
        Some(ceiling) if index == 0 => free.min(ceiling.max(Decimal::ZERO)),
        _ => free,
    }
}

/// Price and base amount of a hop's limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerms {
    /// Limit price.
    pub price: Decimal,
    /// Base amount.
    pub amount: Decimal,
}

/// Derive the limit order for spending `amount_in` on `hop`.
///
/// Sells are floored to the amount precision. Buys spend `amount_in / limit`
/// base units. The limit is the book price moved by `slippage` against us.
pub fn order_terms(hop: &Hop, amount_in: Decimal, slippage: Decimal) -> Result<OrderTerms, String> {
    let rules = &hop.rules;
    let (price, amount) = match hop.side {
        Side::Sell => (
            rules.floor_price(hop.price * (Decimal::ONE - slippage)),
            rules.floor_amount(amount_in),
        ),
        Side::Buy => {
            let price = rules.ceil_price(hop.price * (Decimal::ONE + slippage));
            if price <= Decimal::ZERO {
                return Err(format!("invalid limit price {price}"));
            }
            (price, rules.floor_amount(amount_in / price))
        }
    };
    rules.check(amount, price)?;
    Ok(OrderTerms { price, amount })
}

/// Amount of `from` spent and amount of `to` received by a settled order, net of fees.
pub fn settled_amounts(hop: &Hop, state: &OrderState) -> (Decimal, Decimal) {
    let notional = state.filled_notional();
    let (mut consumed, mut received) = match hop.side {
        Side::Sell => (state.filled, notional),
        Side::Buy => (notional, state.filled),
    };
    match state.fee_currency.as_deref() {
        Some(currency) if currency == hop.to => received -= state.fee,
        Some(currency) if currency == hop.from => consumed += state.fee,
        _ => {}
    }
    (consumed, received.max(Decimal::ZERO))
}

enum HopOutcome {
    Settled,
    Dust { remaining: Decimal },
}

/// Executes opportunities against venue connectors.
pub struct SwapExecutor {
    connectors: Arc<HashMap<String, SharedConnector>>,
    balances: BalanceProvider,
    blacklist: Arc<Blacklist>,
    mirror: MirrorGuard,
    telemetry: TelemetryRecorder,
    config: ExecutorConfig,
}

impl SwapExecutor {
    /// Create an executor.
    pub fn new(
        connectors: Arc<HashMap<String, SharedConnector>>,
        balances: BalanceProvider,
        blacklist: Arc<Blacklist>,
        mirror: MirrorGuard,
        telemetry: TelemetryRecorder,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            connectors,
            balances,
            blacklist,
            mirror,
            telemetry,
            config,
        }
    }

    /// Executor settings.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Cancel every mirror order being monitored.
    pub fn cancel_mirrors(&self) {
        self.mirror.cancel_all();
    }

    fn connector(&self, venue: &str) -> Result<&dyn VenueConnector, ExecutionError> {
        self.connectors
            .get(venue)
            .map(|c| c.as_ref())
            .ok_or_else(|| ExecutionError::UnknownVenue {
                venue: venue.to_string(),
            })
    }

    /// Execute `opportunity` and return the finished plan.
    ///
    /// Fails only when no plan can be built; hop failures end in an aborted plan.
    #[instrument(skip(self, opportunity), fields(path = %opportunity.cycle.path()))]
    pub async fn execute(&self, opportunity: &Opportunity) -> Result<SwapPlan, ExecutionError> {
        let first = opportunity
            .cycle
            .edges()
            .first()
            .ok_or(ExecutionError::EmptyPlan)?;
        let free = self.balances.get_free_balance(&first.venue, &first.from).await;
        let initial = size_hop(0, free, self.config.trade_ceiling);

        let mut plan =
            SwapPlan::from_opportunity(opportunity, initial, self.config.slippage_tolerance)?;
        info!(
            plan = %plan.id,
            start = %plan.start_currency,
            initial = %initial,
            hops = plan.hop_count(),
            "Executing swap plan"
        );

        if let Err((hop, e)) = self.run_plan(&mut plan).await {
            self.abort(&mut plan, hop, e).await;
        }

        self.telemetry.plan_finished(&plan);
        Ok(plan)
    }

    async fn run_plan(&self, plan: &mut SwapPlan) -> Result<(), (usize, ExecutionError)> {
        let last = plan.hop_count() - 1;
        for index in 0..plan.hop_count() {
            match self.run_hop(plan, index).await.map_err(|e| (index, e))? {
                HopOutcome::Settled if index == last => {
                    plan.transition(PlanState::Completed, Some(index), None);
                }
                HopOutcome::Settled => {
                    plan.transition(PlanState::NextHop, Some(index), None);
                }
                HopOutcome::Dust { remaining } => {
                    plan.transition(
                        PlanState::MirrorPending,
                        Some(index),
                        Some(format!("dust remainder {remaining}")),
                    );
                    self.run_mirror(plan, index, remaining)
                        .await
                        .map_err(|e| (index, e))?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    async fn run_hop(&self, plan: &mut SwapPlan, index: usize) -> Result<HopOutcome, ExecutionError> {
        let hop = plan.hops[index].clone();
        let is_last = index + 1 == plan.hop_count();
        let connector = self.connector(&hop.venue)?;

        let free = self.balances.get_free_balance(&hop.venue, &hop.from).await;
        let mut amount_in = size_hop(index, free, self.config.trade_ceiling);
        if amount_in <= Decimal::ZERO {
            return Err(ExecutionError::NoBalance {
                hop: index,
                venue: hop.venue.clone(),
                currency: hop.from.clone(),
            });
        }
        plan.records[index].amount_in = amount_in;

        let mut reduced = false;
        let mut last_error = None;

        while plan.records[index].attempt_count < self.config.hop_max_attempts {
            plan.records[index].attempt_count += 1;
            let attempt = plan.records[index].attempt_count;
            plan.transition(
                PlanState::HopSubmitting,
                Some(index),
                Some(format!("attempt {attempt}, {amount_in} {}", hop.from)),
            );

            let terms = order_terms(&hop, amount_in, self.config.slippage_tolerance).map_err(
                |reason| ExecutionError::BelowMinimum {
                    hop: index,
                    symbol: hop.symbol.clone(),
                    reason,
                },
            )?;
            let params = OrderParams::new(hop.symbol.clone(), hop.side, terms.price, terms.amount);

            let ack = match submit_with_timeout(connector, &params, self.config.order_timeout).await {
                Ok(ack) => ack,
                Err(e) => match e.class() {
                    ErrorClass::InsufficientBalance if !reduced => {
                        reduced = true;
                        amount_in *= Decimal::ONE - self.config.insufficient_retry_fraction;
                        warn!(hop = index, error = %e, amount_in = %amount_in, "Insufficient balance, retrying with reduced amount");
                        last_error = Some(e.into());
                        continue;
                    }
                    ErrorClass::Compliance => {
                        self.blacklist_pair(&hop, &e);
                        return Err(e.into());
                    }
                    ErrorClass::InsufficientBalance | ErrorClass::Precision => return Err(e.into()),
                    ErrorClass::Transient | ErrorClass::Permanent => {
                        warn!(hop = index, attempt, error = %e, "Order placement failed");
                        last_error = Some(e.into());
                        continue;
                    }
                },
            };

            plan.records[index].order_id = Some(ack.order_id.clone());
            plan.records[index].status = HopStatus::Submitted;
            plan.transition(PlanState::HopSettling, Some(index), Some(ack.order_id.clone()));

            let state = settle_order(
                connector,
                &hop.symbol,
                &ack.order_id,
                self.config.order_timeout,
                self.config.poll_interval,
            )
            .await?;

            if state.filled <= Decimal::ZERO {
                warn!(hop = index, order_id = %ack.order_id, status = %state.status, "Order settled without fills");
                last_error = Some(ExecutionError::Unfilled {
                    hop: index,
                    order_id: ack.order_id.clone(),
                });
                continue;
            }

            let (consumed, received) = settled_amounts(&hop, &state);
            plan.records[index].add_fill(consumed, received, state.filled, state.fee);
            info!(
                hop = index,
                order_id = %ack.order_id,
                consumed = %consumed,
                received = %received,
                fee = %state.fee,
                "Hop settled"
            );

            if !self.config.settle_delay.is_zero() {
                sleep(self.config.settle_delay).await;
            }

            if state.is_filled() || !is_last {
                plan.records[index].status = HopStatus::Completed;
                return Ok(HopOutcome::Settled);
            }

            let remaining = (amount_in - consumed).max(Decimal::ZERO);
            let dust = self.config.dust_threshold * plan.initial_input();
            let remaining_value = remaining * hop.expected_rate();
            if plan.records[index].amount_out < dust || remaining_value < dust {
                plan.records[index].status = HopStatus::Mirrored;
                return Ok(HopOutcome::Dust { remaining });
            }

            let free = self.balances.get_free_balance(&hop.venue, &hop.from).await;
            amount_in = remaining.min(free);
            info!(hop = index, remaining = %amount_in, "Partial fill, resubmitting remainder");
        }

        Err(last_error.unwrap_or(ExecutionError::Unfilled {
            hop: index,
            order_id: plan.records[index].order_id.clone().unwrap_or_default(),
        }))
    }

    async fn run_mirror(
        &self,
        plan: &mut SwapPlan,
        index: usize,
        remaining: Decimal,
    ) -> Result<(), ExecutionError> {
        let hop = plan.hops[index].clone();
        let connector = self.connector(&hop.venue)?;

        let order = self.mirror.open(&plan.id, connector, &hop, remaining).await?;
        let order = self.mirror.monitor(order, connector).await?;
        self.record_mirror_fills(plan, &hop, &order);

        if let Some(note) = order.outcome_note() {
            plan.annotations.push(note);
        }
        plan.transition(
            PlanState::Completed,
            Some(index),
            Some(format!("mirror {}", order.status)),
        );
        Ok(())
    }

    fn record_mirror_fills(&self, plan: &mut SwapPlan, hop: &Hop, order: &MirrorOrder) {
        let record = &mut plan.records[hop.index];
        for state in order.fills().filter(|s| s.filled > Decimal::ZERO) {
            let (consumed, received) = settled_amounts(hop, state);
            record.add_fill(consumed, received, state.filled, state.fee);
        }
    }

    fn blacklist_pair(&self, hop: &Hop, e: &VenueError) {
        let entry = BlacklistEntry::new(&hop.venue, &hop.symbol, e.to_string());
        if self.blacklist.append(entry.clone()) {
            self.telemetry.record(TelemetryEvent::Blacklisted { entry });
        }
    }

    async fn abort(&self, plan: &mut SwapPlan, hop: usize, e: ExecutionError) {
        if let Some(record) = plan.records.get_mut(hop) {
            record.status = HopStatus::Failed;
        }

        let touched: BTreeSet<(String, String)> = plan
            .hops
            .iter()
            .flat_map(|h| {
                [
                    (h.venue.clone(), h.from.clone()),
                    (h.venue.clone(), h.to.clone()),
                ]
            })
            .collect();
        let mut held = Vec::new();
        for (venue, currency) in touched {
            let amount = self.balances.get_free_balance(&venue, &currency).await;
            if amount > Decimal::ZERO {
                held.push(HeldAmount {
                    venue,
                    currency,
                    amount,
                });
            }
        }

        let class = e.class();
        error!(
            plan = %plan.id,
            hop,
            class = %class,
            error = %e,
            held = ?held,
            "Swap plan aborted"
        );
        plan.abort = Some(AbortReport {
            hop,
            class,
            error: e.to_string(),
            held,
        });
        plan.transition(PlanState::Aborted, Some(hop), Some(e.to_string()));
    }
}

impl std::fmt::Debug for SwapExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapExecutor")
            .field("venues", &self.connectors.keys().collect::<Vec<_>>())
            .field("blacklisted", &self.blacklist.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::filter::{FilterConfig, OpportunityFilter};
    use crate::arbitrage::Cycle;
    use crate::balance::CredentialStore;
    use crate::config::Credentials;
    use crate::execution::mirror::MirrorConfig;
    use crate::graph::build_venue_edges;
    use crate::orderbook::PriceLevel;
    use crate::telemetry::MemorySink;
    use crate::venue::mock::{MockMarket, MockMarketBuilder, MockVenue};
    use crate::venue::VenueSnapshot;
    use rust_decimal_macros::dec;

    fn markets(eth_bids: Vec<PriceLevel>) -> Vec<MockMarket> {
        let mut eth_usdt = MockMarketBuilder::new("ETH", "USDT")
            .rules(4, 2, dec!(0.001), dec!(0.01))
            .ask(PriceLevel::new(dec!(5.3), dec!(100)));
        for level in eth_bids {
            eth_usdt = eth_usdt.bid(level);
        }
        vec![
            MockMarketBuilder::new("BTC", "USDT")
                .rules(6, 2, dec!(0.0001), dec!(1))
                .bid(PriceLevel::new(dec!(99), dec!(10)))
                .ask(PriceLevel::new(dec!(100), dec!(10)))
                .build(),
            MockMarketBuilder::new("ETH", "BTC")
                .rules(4, 6, dec!(0.001), dec!(0.0001))
                .bid(PriceLevel::new(dec!(0.049), dec!(100)))
                .ask(PriceLevel::new(dec!(0.05), dec!(100)))
                .build(),
            eth_usdt.build(),
        ]
    }

    /// USDT -> BTC -> ETH -> USDT at 1/100, 1/0.05 and 5.2: product 1.04.
    fn opportunity(markets: &[MockMarket]) -> Opportunity {
        let snapshot = VenueSnapshot {
            venue: "mock".to_string(),
            markets: markets.iter().map(|m| m.info.clone()).collect(),
            books: markets
                .iter()
                .map(|m| (m.info.symbol.clone(), m.book.clone()))
                .collect(),
        };
        let (edges, _) = build_venue_edges(&snapshot);
        let pick = |symbol: &str, side: Side| {
            edges
                .iter()
                .find(|e| e.symbol == symbol && e.side == side)
                .cloned()
                .unwrap()
        };
        let cycle = Cycle::new(vec![
            pick("BTC/USDT", Side::Buy),
            pick("ETH/BTC", Side::Buy),
            pick("ETH/USDT", Side::Sell),
        ])
        .unwrap();

        let filter = OpportunityFilter::new(
            FilterConfig {
                anchor: Some("USDT".to_string()),
                ..FilterConfig::default()
            },
            Arc::new(Blacklist::default()),
        );
        filter.filter_and_rank(vec![cycle]).remove(0)
    }

    struct Harness {
        venue: Arc<MockVenue>,
        blacklist: Arc<Blacklist>,
        sink: Arc<MemorySink>,
        executor: SwapExecutor,
    }

    fn harness(markets: Vec<MockMarket>, config: ExecutorConfig) -> Harness {
        let venue = Arc::new(MockVenue::new("mock"));
        for market in markets {
            venue.add_market(market);
        }
        venue.set_balance("USDT", dec!(100));

        let mut connectors: HashMap<String, SharedConnector> = HashMap::new();
        connectors.insert("mock".to_string(), venue.clone());
        let connectors = Arc::new(connectors);
        let mut credentials = CredentialStore::new();
        credentials.insert("mock", Credentials::paper());

        let sink = Arc::new(MemorySink::default());
        let telemetry = TelemetryRecorder::new(sink.clone());
        let blacklist = Arc::new(Blacklist::default());
        let mirror = MirrorGuard::new(
            MirrorConfig {
                ttl: Duration::from_secs(1),
                check_interval: Duration::from_millis(100),
                max_lifetime: Duration::from_secs(2),
                ..MirrorConfig::default()
            },
            telemetry.clone(),
        );

        let executor = SwapExecutor::new(
            connectors.clone(),
            BalanceProvider::standard(connectors, Arc::new(credentials)),
            blacklist.clone(),
            mirror,
            telemetry,
            config,
        );
        Harness {
            venue,
            blacklist,
            sink,
            executor,
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            settle_delay: Duration::ZERO,
            slippage_tolerance: dec!(0.01),
            ..ExecutorConfig::default()
        }
    }

    fn deep_bids() -> Vec<PriceLevel> {
        vec![PriceLevel::new(dec!(5.2), dec!(100))]
    }

    #[test]
    fn sizing_is_a_pure_function_of_balance() {
        assert_eq!(size_hop(0, dec!(100), Some(dec!(40))), dec!(40));
        assert_eq!(size_hop(0, dec!(30), Some(dec!(40))), dec!(30));
        assert_eq!(size_hop(1, dec!(100), Some(dec!(40))), dec!(100));
        assert_eq!(size_hop(0, dec!(-1), None), Decimal::ZERO);
        assert_eq!(
            size_hop(2, dec!(19.6059), None),
            size_hop(2, dec!(19.6059), None)
        );
    }

    #[test]
    fn order_terms_apply_slippage_and_precision() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let plan = SwapPlan::from_opportunity(&opportunity, dec!(100), dec!(0.01)).unwrap();

        let buy = order_terms(&plan.hops[0], dec!(100), dec!(0.01)).unwrap();
        assert_eq!(buy.price, dec!(101));
        assert_eq!(buy.amount, dec!(0.990099));

        let sell = order_terms(&plan.hops[2], dec!(19.60599), dec!(0.01)).unwrap();
        assert_eq!(sell.price, dec!(5.14));
        assert_eq!(sell.amount, dec!(19.6059));

        assert!(order_terms(&plan.hops[0], dec!(0.5), dec!(0.01)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn profitable_cycle_completes_every_hop() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Completed);
        assert_eq!(plan.completed_hops(), 3);
        assert_eq!(plan.records[0].consumed_in, dec!(99.0099));
        assert_eq!(plan.records[2].amount_out, dec!(101.95068));
        assert_eq!(plan.realized_product(), dec!(1.04));
        assert!(plan.abort.is_none());
        assert_eq!(h.venue.orders_placed(), 3);
        assert!(h.sink.records().iter().any(|r| matches!(
            r.event,
            TelemetryEvent::PlanFinished { state: PlanState::Completed, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_balance_retries_once_with_reduced_amount() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());
        h.venue.push_order_error(VenueError::InsufficientPosition {
            venue: "mock".to_string(),
            reason: "balance locked".to_string(),
        });

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Completed);
        assert_eq!(plan.records[0].attempt_count, 2);
        let submitted = h.venue.submitted_orders();
        assert!(submitted[1].amount < submitted[0].amount);
    }

    #[tokio::test(start_paused = true)]
    async fn compliance_rejection_blacklists_pair_and_aborts() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());
        h.venue.push_order_error(VenueError::Compliance {
            venue: "mock".to_string(),
            symbol: "BTC/USDT".to_string(),
            reason: "restricted".to_string(),
        });

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Aborted);
        let abort = plan.abort.as_ref().unwrap();
        assert_eq!(abort.hop, 0);
        assert_eq!(abort.class, ErrorClass::Compliance);
        assert!(h.blacklist.contains("mock", "BTC/USDT"));
        assert_eq!(h.venue.order_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_budget_and_report_holdings() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(
            markets,
            ExecutorConfig {
                hop_max_attempts: 2,
                ..config()
            },
        );
        for _ in 0..2 {
            h.venue
                .push_order_error(VenueError::Network("connection reset".to_string()));
        }

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Aborted);
        assert_eq!(plan.records[0].status, HopStatus::Failed);
        assert_eq!(plan.records[0].attempt_count, 2);
        let abort = plan.abort.unwrap();
        assert_eq!(abort.class, ErrorClass::Transient);
        assert_eq!(
            abort.held,
            vec![HeldAmount {
                venue: "mock".to_string(),
                currency: "USDT".to_string(),
                amount: dec!(100),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn order_accepted_before_connection_reset_is_settled_once() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());
        h.venue
            .push_lost_ack(VenueError::Network("connection reset after send".to_string()));

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Completed);
        assert_eq!(plan.records[0].attempt_count, 1);
        assert_eq!(plan.records[0].consumed_in, dec!(99.0099));
        assert!(plan.records[0].order_id.is_some());
        assert_eq!(h.venue.order_attempts(), 3);
        assert_eq!(h.venue.orders_placed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_balance_aborts_before_any_order() {
        let markets = markets(deep_bids());
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());
        h.venue.set_balance("USDT", Decimal::ZERO);

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Aborted);
        assert_eq!(plan.abort.unwrap().class, ErrorClass::InsufficientBalance);
        assert_eq!(h.venue.order_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_hop_dust_is_handed_to_mirror_guard() {
        let markets = markets(vec![
            PriceLevel::new(dec!(5.2), dec!(19.6)),
            PriceLevel::new(dec!(5.0), dec!(100)),
        ]);
        let opportunity = opportunity(&markets);
        let h = harness(markets, config());

        let plan = h.executor.execute(&opportunity).await.unwrap();

        assert_eq!(plan.state, PlanState::Completed);
        assert_eq!(plan.records[2].status, HopStatus::Mirrored);
        assert_eq!(plan.records[2].filled_amount, dec!(19.6));
        assert_eq!(plan.annotations.len(), 1);
        assert!(plan
            .history
            .iter()
            .any(|t| t.to == PlanState::MirrorPending));

        let mirror = h.venue.submitted_orders().pop().unwrap();
        assert_eq!(mirror.price, dec!(5.15));
        assert_eq!(mirror.amount, dec!(0.0059));
    }
}
