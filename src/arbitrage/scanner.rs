//! One scan iteration: fetch every venue, build edges, detect, filter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::cycle::Cycle;
use super::detector::CycleDetector;
use super::filter::{FilterReport, Opportunity, OpportunityFilter};
use crate::error::{BotError, DetectionError, VenueError};
use crate::execution::supervisor::{ExecutionSupervisor, Job, SupervisorStats};
use crate::graph::{build_venue_edges, MarketEdge, MarketGraph, RejectedPair};
use crate::telemetry::{OpportunitySummary, Phase, TelemetryEvent, TelemetryRecorder};
use crate::venue::{SharedConnector, VenueConnector, VenueSnapshot};

/// Scope label for detection over the merged multi-venue graph.
pub const CROSS_SCOPE: &str = "cross";

/// Scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Venues fetched concurrently.
    pub pool_size: usize,
    /// Book levels requested per pair.
    pub book_depth: usize,
    /// Also search the merged graph of every venue.
    pub cross_venue: bool,
    /// Keep only the best single-venue opportunity.
    pub live: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            book_depth: 5,
            cross_venue: true,
            live: false,
        }
    }
}

/// Pull markets and books for every active market on a venue.
///
/// A book that fails to load is left out; the graph builder then rejects the pair.
#[instrument(skip(connector), fields(venue = %connector.venue()))]
pub async fn fetch_snapshot(
    connector: &dyn VenueConnector,
    depth: usize,
) -> Result<VenueSnapshot, VenueError> {
    let markets = connector.fetch_markets().await?;
    let mut books = HashMap::with_capacity(markets.len());

    for market in markets.iter().filter(|m| m.active) {
        match connector.fetch_order_book(&market.symbol, depth).await {
            Ok(book) => {
                books.insert(market.symbol.clone(), book);
            }
            Err(e) => debug!(symbol = %market.symbol, error = %e, "Skipping book"),
        }
    }

    Ok(VenueSnapshot {
        venue: connector.venue().to_string(),
        markets,
        books,
    })
}

/// Result of one iteration.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Iteration number, starting at 1.
    pub iteration: u64,
    /// Ranked opportunities, best first.
    pub opportunities: Vec<Opportunity>,
    /// Filter drop counts.
    pub report: FilterReport,
    /// Pairs left out of the graph.
    pub rejected: Vec<RejectedPair>,
    /// Venues that could not be fetched.
    pub failed_venues: Vec<String>,
    /// Whether any detection result came from the fallback worker.
    pub fallback_used: bool,
}

/// Runs scan iterations over a fixed set of venues.
pub struct Scanner {
    connectors: Vec<SharedConnector>,
    config: ScanConfig,
    detector: Arc<CycleDetector>,
    filter: OpportunityFilter,
    supervisor: ExecutionSupervisor,
    telemetry: TelemetryRecorder,
    iteration: AtomicU64,
}

impl Scanner {
    /// Create a scanner.
    pub fn new(
        connectors: Vec<SharedConnector>,
        config: ScanConfig,
        detector: CycleDetector,
        filter: OpportunityFilter,
        supervisor: ExecutionSupervisor,
        telemetry: TelemetryRecorder,
    ) -> Self {
        Self {
            connectors,
            config,
            detector: Arc::new(detector),
            filter,
            supervisor,
            telemetry,
            iteration: AtomicU64::new(0),
        }
    }

    /// Venue ids scanned.
    pub fn venues(&self) -> Vec<String> {
        self.connectors.iter().map(|c| c.venue().to_string()).collect()
    }

    /// Detection supervisor counters.
    pub fn supervisor_stats(&self) -> SupervisorStats {
        self.supervisor.stats()
    }

    /// Run one iteration.
    ///
    /// Venue failures are reported in the outcome; a detection the supervisor
    /// could not recover is an error.
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> Result<ScanOutcome, BotError> {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;

        let (graph, rejected, failed_venues) = self.fetch_graph(iteration).await;

        let started = Instant::now();
        let (cycles, fallback_used) = self.detect(iteration, &graph).await?;
        self.telemetry
            .phase(iteration, None, Phase::Detection, started.elapsed());

        let started = Instant::now();
        let (mut opportunities, report) = self.filter.filter_with_report(cycles);
        if self.config.live {
            // Cross-venue cycles are never executed.
            opportunities.retain(|o| o.cycle.is_single_venue());
            opportunities.truncate(1);
        }
        self.telemetry
            .phase(iteration, None, Phase::Filtering, started.elapsed());
        self.telemetry.record(TelemetryEvent::Filtered {
            iteration,
            report,
            opportunities: opportunities.iter().map(OpportunitySummary::from).collect(),
        });

        info!(
            iteration,
            edges = graph.edge_count(),
            currencies = graph.currencies().len(),
            rejected = rejected.len(),
            failed = failed_venues.len(),
            opportunities = opportunities.len(),
            best = opportunities.first().map(|o| o.cycle.path()).unwrap_or_default(),
            "Scan complete"
        );

        Ok(ScanOutcome {
            iteration,
            opportunities,
            report,
            rejected,
            failed_venues,
            fallback_used,
        })
    }

    async fn fetch_graph(&self, iteration: u64) -> (MarketGraph, Vec<RejectedPair>, Vec<String>) {
        let depth = self.config.book_depth;
        let results: Vec<_> = stream::iter(self.connectors.iter().cloned())
            .map(|connector| async move {
                let started = Instant::now();
                let result = fetch_snapshot(connector.as_ref(), depth)
                    .await
                    .map(|snapshot| build_venue_edges(&snapshot));
                (connector.venue().to_string(), result, started.elapsed())
            })
            .buffer_unordered(self.config.pool_size.max(1))
            .collect()
            .await;

        let mut graph = MarketGraph::new();
        let mut rejected = Vec::new();
        let mut failed = Vec::new();

        for (venue, result, elapsed) in results {
            self.telemetry
                .phase(iteration, Some(&venue), Phase::Fetch, elapsed);
            match result {
                Ok((edges, venue_rejected)) => {
                    self.telemetry.record(TelemetryEvent::Graph {
                        iteration,
                        venue: venue.clone(),
                        edges: edges.len(),
                        rejected: venue_rejected.len(),
                    });
                    graph.insert_venue(&venue, edges);
                    rejected.extend(venue_rejected);
                }
                Err(e) => {
                    warn!(venue = %venue, error = %e, "Venue fetch failed");
                    self.telemetry.record(TelemetryEvent::FetchFailed {
                        iteration,
                        venue: venue.clone(),
                        error: e.to_string(),
                    });
                    failed.push(venue);
                }
            }
        }
        failed.sort();

        (graph, rejected, failed)
    }

    async fn detect(
        &self,
        iteration: u64,
        graph: &MarketGraph,
    ) -> Result<(Vec<Cycle>, bool), BotError> {
        let mut scopes: Vec<(String, Vec<MarketEdge>)> = graph
            .venues()
            .map(|venue| (venue.to_string(), graph.venue_edges(venue).to_vec()))
            .collect();
        if self.config.cross_venue && scopes.len() > 1 {
            scopes.push((CROSS_SCOPE.to_string(), graph.merged()));
        }

        let mut cycles = Vec::new();
        let mut seen = HashSet::new();
        let mut fallback_used = false;

        for (scope, edges) in scopes {
            if edges.is_empty() {
                continue;
            }
            let detector = self.detector.clone();
            let edges = Arc::new(edges);
            let job: Job<Result<Vec<Cycle>, DetectionError>> =
                Arc::new(move |cancel: &AtomicBool| detector.detect_all(&edges, cancel));

            let supervised = self.supervisor.run(&format!("detect:{scope}"), job).await?;
            let found = supervised.value?;
            fallback_used |= supervised.fallback;

            self.telemetry.record(TelemetryEvent::Detection {
                iteration,
                scope: scope.clone(),
                cycles: found.len(),
                fallback: supervised.fallback,
            });
            debug!(scope = %scope, cycles = found.len(), "Detection finished");

            for cycle in found {
                if seen.insert(cycle.canonical_key()) {
                    cycles.push(cycle);
                }
            }
        }

        Ok((cycles, fallback_used))
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("venues", &self.venues())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::blacklist::{Blacklist, BlacklistEntry};
    use crate::arbitrage::detector::DetectorConfig;
    use crate::arbitrage::filter::FilterConfig;
    use crate::execution::supervisor::SupervisorConfig;
    use crate::orderbook::PriceLevel;
    use crate::telemetry::MemorySink;
    use crate::venue::mock::{MockConfig, MockMarket, MockMarketBuilder, MockVenue};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn btc_usdt(bid: Decimal, ask: Decimal) -> MockMarket {
        MockMarketBuilder::new("BTC", "USDT")
            .bid(PriceLevel::new(bid, dec!(10)))
            .ask(PriceLevel::new(ask, dec!(10)))
            .build()
    }

    fn triangle_venue(name: &str) -> MockVenue {
        let venue = MockVenue::new(name);
        venue.add_market(btc_usdt(dec!(99), dec!(100)));
        venue.add_market(
            MockMarketBuilder::new("ETH", "BTC")
                .bid(PriceLevel::new(dec!(0.049), dec!(100)))
                .ask(PriceLevel::new(dec!(0.05), dec!(100)))
                .build(),
        );
        venue.add_market(
            MockMarketBuilder::new("ETH", "USDT")
                .bid(PriceLevel::new(dec!(5.2), dec!(100)))
                .ask(PriceLevel::new(dec!(5.3), dec!(100)))
                .build(),
        );
        venue
    }

    fn scanner(
        venues: Vec<MockVenue>,
        config: ScanConfig,
        blacklist: Blacklist,
        sink: Arc<MemorySink>,
    ) -> Scanner {
        let telemetry = TelemetryRecorder::new(sink);
        Scanner::new(
            venues
                .into_iter()
                .map(|v| Arc::new(v) as SharedConnector)
                .collect(),
            config,
            CycleDetector::new(DetectorConfig::default()),
            OpportunityFilter::new(
                FilterConfig {
                    anchor: Some("USDT".to_string()),
                    ..FilterConfig::default()
                },
                Arc::new(blacklist),
            ),
            ExecutionSupervisor::new(SupervisorConfig::default(), telemetry.clone()),
            telemetry,
        )
    }

    #[tokio::test]
    async fn snapshot_skips_inactive_markets() {
        let venue = triangle_venue("alpha");
        venue.add_market(
            MockMarketBuilder::new("XRP", "USDT")
                .inactive()
                .bid(PriceLevel::new(dec!(0.5), dec!(10)))
                .ask(PriceLevel::new(dec!(0.51), dec!(10)))
                .build(),
        );

        let snapshot = fetch_snapshot(&venue, 5).await.unwrap();
        assert_eq!(snapshot.markets.len(), 4);
        assert_eq!(snapshot.books.len(), 3);
        assert!(!snapshot.books.contains_key("XRP/USDT"));
    }

    #[tokio::test]
    async fn finds_triangle_and_records_telemetry() {
        let sink = Arc::new(MemorySink::default());
        let scanner = scanner(
            vec![triangle_venue("alpha")],
            ScanConfig::default(),
            Blacklist::default(),
            sink.clone(),
        );

        let outcome = scanner.scan_once().await.unwrap();

        assert_eq!(outcome.iteration, 1);
        assert_eq!(outcome.opportunities.len(), 1);
        let best = &outcome.opportunities[0];
        assert_eq!(best.cycle.path(), "USDT -> BTC -> ETH -> USDT");
        assert!(best.cycle.is_single_venue());
        assert!(!outcome.fallback_used);

        let events = sink.records();
        assert!(events
            .iter()
            .any(|r| matches!(r.event, TelemetryEvent::Filtered { .. })));
        assert!(events
            .iter()
            .any(|r| matches!(r.event, TelemetryEvent::Detection { cycles: 1, .. })));
    }

    #[tokio::test]
    async fn blacklisted_pair_removes_cycle_every_run() {
        let sink = Arc::new(MemorySink::default());
        let scanner = scanner(
            vec![triangle_venue("alpha")],
            ScanConfig::default(),
            Blacklist::new([BlacklistEntry::new("*", "eth-btc", "restricted")]),
            sink,
        );

        for _ in 0..3 {
            let outcome = scanner.scan_once().await.unwrap();
            assert!(outcome.opportunities.is_empty());
            assert_eq!(outcome.report.blacklisted, 1);
        }
    }

    #[tokio::test]
    async fn failed_venue_does_not_stop_the_scan() {
        let sink = Arc::new(MemorySink::default());
        let broken = MockVenue::with_config(
            "broken",
            MockConfig {
                fail_markets: true,
                ..MockConfig::default()
            },
        );
        let scanner = scanner(
            vec![triangle_venue("alpha"), broken],
            ScanConfig::default(),
            Blacklist::default(),
            sink,
        );

        let outcome = scanner.scan_once().await.unwrap();
        assert_eq!(outcome.failed_venues, vec!["broken".to_string()]);
        assert_eq!(outcome.opportunities.len(), 1);
    }

    /// BTC is cheap on one venue and rich on the other.
    fn spread_venues() -> Vec<MockVenue> {
        let cheap = MockVenue::new("cheap");
        cheap.add_market(btc_usdt(dec!(99), dec!(100)));
        let rich = MockVenue::new("rich");
        rich.add_market(btc_usdt(dec!(102), dec!(103)));
        vec![cheap, rich]
    }

    #[tokio::test]
    async fn cross_venue_cycles_need_the_merged_graph() {
        let sink = Arc::new(MemorySink::default());
        let per_venue = scanner(
            spread_venues(),
            ScanConfig {
                cross_venue: false,
                ..ScanConfig::default()
            },
            Blacklist::default(),
            sink.clone(),
        );
        assert!(per_venue.scan_once().await.unwrap().opportunities.is_empty());

        let merged = scanner(spread_venues(), ScanConfig::default(), Blacklist::default(), sink);
        let outcome = merged.scan_once().await.unwrap();
        assert_eq!(outcome.opportunities.len(), 1);
        let cycle = &outcome.opportunities[0].cycle;
        assert_eq!(cycle.hop_count(), 2);
        assert!(!cycle.is_single_venue());
    }

    #[tokio::test]
    async fn live_mode_keeps_one_opportunity() {
        let sink = Arc::new(MemorySink::default());
        let scanner = scanner(
            vec![triangle_venue("alpha"), triangle_venue("beta")],
            ScanConfig {
                live: true,
                ..ScanConfig::default()
            },
            Blacklist::default(),
            sink,
        );

        let outcome = scanner.scan_once().await.unwrap();
        assert!(outcome.report.accepted >= 2);
        assert_eq!(outcome.opportunities.len(), 1);
    }

    #[tokio::test]
    async fn live_mode_skips_past_richer_cross_venue_cycle() {
        let sink = Arc::new(MemorySink::default());
        let rich = MockVenue::new("rich");
        rich.add_market(btc_usdt(dec!(105), dec!(106)));
        let scanner = scanner(
            vec![triangle_venue("cheap"), rich],
            ScanConfig {
                live: true,
                cross_venue: true,
                ..ScanConfig::default()
            },
            Blacklist::default(),
            sink,
        );

        let outcome = scanner.scan_once().await.unwrap();
        assert!(outcome.report.accepted >= 2);
        assert_eq!(outcome.opportunities.len(), 1);
        let best = &outcome.opportunities[0];
        assert!(best.cycle.is_single_venue());
        assert_eq!(best.cycle.path(), "USDT -> BTC -> ETH -> USDT");
    }
}
