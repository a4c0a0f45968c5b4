//! End-to-end tests over paper venues.
//!
//! Two venues list four currencies between them. One venue carries a profitable
//! USDT -> BTC -> ETH -> USDT triangle; every cycle through the other venue loses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use cycle_arb::arbitrage::{
    Blacklist, CycleDetector, DetectorConfig, FilterConfig, OpportunityFilter, ScanConfig,
    Scanner,
};
use cycle_arb::balance::{BalanceProvider, CredentialStore};
use cycle_arb::config::Credentials;
use cycle_arb::engine::Engine;
use cycle_arb::execution::{
    ExecutionSupervisor, ExecutorConfig, HopStatus, MirrorConfig, MirrorGuard, PlanState,
    SupervisorConfig, SwapExecutor,
};
use cycle_arb::orderbook::{OrderBook, PriceLevel};
use cycle_arb::telemetry::{JsonLinesSink, TelemetryRecorder};
use cycle_arb::venue::{
    MarketInfo, PaperSnapshot, PaperVenue, RetryPolicy, RetryingConnector, SharedConnector,
    VenueConnector,
};

fn market(base: &str, quote: &str, price_precision: u32) -> MarketInfo {
    MarketInfo {
        symbol: MarketInfo::symbol_for(base, quote),
        base: base.to_string(),
        quote: quote.to_string(),
        active: true,
        taker_fee: dec!(0.001),
        amount_precision: Some(6),
        price_precision: Some(price_precision),
        min_amount: Some(dec!(0.0001)),
        min_notional: Some(dec!(0.0001)),
        min_price: None,
    }
}

fn book(symbol: &str, bid: Decimal, ask: Decimal, size: Decimal) -> OrderBook {
    OrderBook::new(
        symbol,
        vec![PriceLevel::new(bid, size)],
        vec![PriceLevel::new(ask, size)],
    )
}

/// 1 USDT buys 0.01 BTC, which buys 0.2 ETH, which sells for 1.04 USDT before fees.
fn alpha() -> PaperVenue {
    let venue = PaperVenue::new("alpha");
    venue.add_market(
        market("BTC", "USDT", 2),
        book("BTC/USDT", dec!(99.9), dec!(100), dec!(50)),
    );
    venue.add_market(
        market("ETH", "BTC", 6),
        book("ETH/BTC", dec!(0.0499), dec!(0.05), dec!(500)),
    );
    venue.add_market(
        market("ETH", "USDT", 4),
        book("ETH/USDT", dec!(5.2), dec!(5.21), dec!(500)),
    );
    venue.set_balance("USDT", dec!(100));
    venue
}

/// Wide spreads: any detour through SOL loses.
fn beta() -> PaperVenue {
    let venue = PaperVenue::new("beta");
    venue.add_market(
        market("SOL", "USDT", 2),
        book("SOL/USDT", dec!(9), dec!(11), dec!(100)),
    );
    venue.add_market(
        market("SOL", "BTC", 4),
        book("SOL/BTC", dec!(0.09), dec!(0.11), dec!(100)),
    );
    venue.set_balance("USDT", dec!(100));
    venue
}

struct World {
    scanner: Scanner,
    executor: SwapExecutor,
    telemetry: TelemetryRecorder,
}

fn world(venues: Vec<PaperVenue>, telemetry: TelemetryRecorder) -> World {
    let mut connectors: HashMap<String, SharedConnector> = HashMap::new();
    let mut credentials = CredentialStore::new();
    for venue in venues {
        let name = venue.venue().to_string();
        credentials.insert(&name, Credentials::paper());
        connectors.insert(
            name,
            RetryingConnector::new(Arc::new(venue), RetryPolicy::default(), 1000).shared(),
        );
    }
    let connectors = Arc::new(connectors);
    let blacklist = Arc::new(Blacklist::default());

    let scanner = Scanner::new(
        connectors.values().cloned().collect(),
        ScanConfig::default(),
        CycleDetector::new(DetectorConfig::default()),
        OpportunityFilter::new(
            FilterConfig {
                anchor: Some("USDT".to_string()),
                ..FilterConfig::default()
            },
            blacklist.clone(),
        ),
        ExecutionSupervisor::new(SupervisorConfig::default(), telemetry.clone()),
        telemetry.clone(),
    );
    let executor = SwapExecutor::new(
        connectors.clone(),
        BalanceProvider::standard(connectors, Arc::new(credentials)),
        blacklist,
        MirrorGuard::new(MirrorConfig::default(), telemetry.clone()),
        telemetry.clone(),
        ExecutorConfig {
            settle_delay: Duration::ZERO,
            ..ExecutorConfig::default()
        },
    );

    World {
        scanner,
        executor,
        telemetry,
    }
}

#[tokio::test]
async fn injected_triangle_is_found_and_executed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let telemetry = TelemetryRecorder::new(Arc::new(JsonLinesSink::create(&path).unwrap()));
    let world = world(vec![alpha(), beta()], telemetry);

    let outcome = world.scanner.scan_once().await.unwrap();
    assert!(outcome.failed_venues.is_empty());
    assert_eq!(outcome.opportunities.len(), 1);

    let opportunity = &outcome.opportunities[0];
    assert_eq!(opportunity.cycle.path(), "USDT -> BTC -> ETH -> USDT");
    assert_eq!(opportunity.cycle.hop_count(), 3);
    assert!(opportunity.cycle.is_single_venue());
    let theoretical = opportunity.cycle.product();
    assert!((theoretical - 1.04 * 0.999_f64.powi(3)).abs() < 1e-9);

    let plan = world.executor.execute(opportunity).await.unwrap();
    assert_eq!(plan.state, PlanState::Completed);
    assert_eq!(plan.records.len(), 3);
    assert!(plan
        .records
        .iter()
        .all(|record| record.status == HopStatus::Completed));
    assert!(plan.abort.is_none());

    let realized = plan.realized_product().to_f64().unwrap();
    assert!(
        (realized - theoretical).abs() < 1e-6,
        "realized {realized} vs theoretical {theoretical}"
    );

    let last = &plan.records[2];
    assert!(last.amount_out > plan.initial_input());

    drop(world);
    let raw = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(events.iter().any(|e| e["event"] == "filtered"));
    assert!(events.iter().any(|e| e["event"] == "plan_finished"));
}

#[tokio::test]
async fn engine_runs_the_plan_and_counts_it() {
    let world = world(vec![alpha(), beta()], TelemetryRecorder::null());
    let engine = Engine::new(
        world.scanner,
        world.executor,
        1,
        Duration::from_millis(50),
        world.telemetry,
    );

    let handle = engine.run_iteration().await.unwrap().expect("plan started");
    handle.await.unwrap();

    let stats = engine.stats().read().await.clone();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.opportunities_found, 1);
    assert_eq!(stats.plans_completed, 1);
    assert_eq!(stats.plans_aborted, 0);
    assert_eq!(stats.last_plan.as_deref(), Some("USDT -> BTC -> ETH -> USDT"));
}

#[tokio::test]
async fn snapshot_file_builds_paper_venues() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(
        &path,
        r#"{
            "venues": [{
                "venue": "alpha",
                "markets": [{
                    "symbol": "BTC/USDT",
                    "base": "BTC",
                    "quote": "USDT",
                    "taker_fee": "0.001",
                    "amount_precision": 6,
                    "price_precision": 2,
                    "min_amount": "0.0001",
                    "min_notional": "1"
                }],
                "books": [{
                    "symbol": "BTC/USDT",
                    "bids": [{"price": "99.9", "size": "2"}],
                    "asks": [{"price": "100", "size": "2"}]
                }],
                "balances": {"USDT": "250"}
            }]
        }"#,
    )
    .unwrap();

    let venues = PaperSnapshot::load(&path).await.unwrap().into_venues();
    assert_eq!(venues.len(), 1);

    let venue = &venues[0];
    assert_eq!(venue.venue(), "alpha");
    let markets = venue.fetch_markets().await.unwrap();
    assert_eq!(markets.len(), 1);
    assert!(markets[0].active);
    let book = venue.fetch_order_book("BTC/USDT", 5).await.unwrap();
    assert_eq!(book.asks[0].price, dec!(100));
    assert_eq!(venue.fetch_free_balance("USDT").await.unwrap(), dec!(250));
}
