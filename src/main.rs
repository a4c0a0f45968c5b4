//! cycle-arb entry point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cycle_arb::api::{create_router, AppState};
use cycle_arb::arbitrage::{Blacklist, CycleDetector, OpportunityFilter, Scanner};
use cycle_arb::balance::{BalanceProvider, CredentialStore};
use cycle_arb::config::{Config, Credentials};
use cycle_arb::engine::Engine;
use cycle_arb::execution::{ExecutionSupervisor, MirrorGuard, SwapExecutor};
use cycle_arb::metrics;
use cycle_arb::telemetry::{JsonLinesSink, NullSink, TelemetryRecorder, TelemetrySink};
use cycle_arb::utils::shutdown_signal;
use cycle_arb::venue::{PaperSnapshot, RetryingConnector, SharedConnector, VenueConnector};

/// Multi-hop currency cycle arbitrage engine.
#[derive(Parser, Debug)]
#[command(name = "cycle-arb")]
#[command(about = "Detects and executes negative-weight currency cycles across venues")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan-and-execute loop (default).
    Run {
        /// Simulate orders against paper venues.
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/status.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one scan iteration and print the ranked opportunities.
    Scan,

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("cycle_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Scan) => cmd_scan().await,
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(None, None).await,
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CYCLE ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Mode: {}", if config.dry_run { "paper" } else { "live" });
    println!("  Venues: {}", config.venues.join(", "));
    for venue in &config.venues {
        let found = Credentials::from_env(venue).is_some();
        println!(
            "    {}: credentials {}",
            venue,
            if found { "present" } else { "missing" }
        );
    }
    if let Some(path) = &config.paper_snapshot_path {
        println!("  Paper snapshot: {}", path);
    }
    println!(
        "  Anchor: {}",
        config.anchor().unwrap_or_else(|| "any".to_string())
    );
    println!("  Triangular only: {}", config.triangular_only);
    println!("  Cross-venue: {}", config.cross_venue);
    println!("  Min profit: {}%", config.min_profit_pct);
    println!("  Trade notional: {}", config.trade_notional);
    println!("  Blacklist entries: {}", config.blacklist_entries().len());
    println!("  Max concurrent plans: {}", config.max_concurrent_plans);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Telemetry recorder for the configured output.
fn telemetry(config: &Config) -> anyhow::Result<TelemetryRecorder> {
    let sink: Arc<dyn TelemetrySink> = match &config.telemetry_path {
        Some(path) => {
            info!("Writing telemetry to {}", path);
            Arc::new(JsonLinesSink::create(path)?)
        }
        None => Arc::new(NullSink),
    };
    Ok(TelemetryRecorder::new(sink))
}

/// Build connectors and credentials for the configured venues.
///
/// Paper venues come from the snapshot file; live venue adapters are supplied by
/// the embedding application through the library API.
async fn connectors(
    config: &Config,
) -> anyhow::Result<(HashMap<String, SharedConnector>, CredentialStore)> {
    if !config.dry_run {
        anyhow::bail!(
            "no live venue adapters are built into this binary; run with --dry-run and PAPER_SNAPSHOT_PATH"
        );
    }
    let path = config
        .paper_snapshot_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("PAPER_SNAPSHOT_PATH is required in dry-run mode"))?;

    let snapshot = PaperSnapshot::load(path).await?;
    let mut connectors = HashMap::new();
    let mut credentials = CredentialStore::new();

    for venue in snapshot.into_venues() {
        let name = venue.venue().to_string();
        if !config.venues.is_empty() && !config.venues.contains(&name) {
            continue;
        }
        let connector = RetryingConnector::new(
            Arc::new(venue),
            config.retry_policy(),
            config.rate_limit_per_sec,
        )
        .shared();
        credentials.insert(&name, Credentials::paper());
        connectors.insert(name, connector);
    }

    for venue in &config.venues {
        if !connectors.contains_key(venue) {
            warn!(venue = %venue, "Venue not present in paper snapshot");
        }
    }
    if connectors.is_empty() {
        anyhow::bail!("no venues to scan");
    }

    Ok((connectors, credentials))
}

fn blacklist(config: &Config) -> Arc<Blacklist> {
    let mut blacklist = Blacklist::new(config.blacklist_entries());
    if let Some(path) = &config.blacklist_journal_path {
        blacklist = blacklist.with_journal(path);
    }
    Arc::new(blacklist)
}

fn scanner(
    config: &Config,
    connectors: &HashMap<String, SharedConnector>,
    blacklist: Arc<Blacklist>,
    telemetry: TelemetryRecorder,
) -> Scanner {
    Scanner::new(
        connectors.values().cloned().collect(),
        config.scan_config(),
        CycleDetector::new(config.detector_config()),
        OpportunityFilter::new(config.filter_config(), blacklist),
        ExecutionSupervisor::new(config.supervisor_config(), telemetry.clone()),
        telemetry,
    )
}

/// Run one scan and print the ranked opportunities.
async fn cmd_scan() -> anyhow::Result<()> {
    let config = load_config()?;
    let telemetry = telemetry(&config)?;
    let (connectors, _) = connectors(&config).await?;
    let scanner = scanner(&config, &connectors, blacklist(&config), telemetry);

    let outcome = scanner.scan_once().await?;

    println!("======================================================================");
    println!("CYCLE ARB - SCAN");
    println!("======================================================================");
    println!("Venues: {}", scanner.venues().join(", "));
    if !outcome.failed_venues.is_empty() {
        println!("Failed venues: {}", outcome.failed_venues.join(", "));
    }
    println!("Rejected pairs: {}", outcome.rejected.len());
    println!(
        "Cycles examined: {}, blacklisted: {}, illiquid: {}, unprofitable: {}",
        outcome.report.examined,
        outcome.report.blacklisted,
        outcome.report.illiquid,
        outcome.report.unprofitable
    );
    if outcome.fallback_used {
        println!("Detection used the fallback worker");
    }
    println!("----------------------------------------------------------------------");

    if outcome.opportunities.is_empty() {
        println!("No opportunities");
    }
    for (rank, opportunity) in outcome.opportunities.iter().enumerate() {
        let venues: Vec<&str> = opportunity.cycle.venues().into_iter().collect();
        println!(
            "{:>2}. {}  net {}%  est {} {}  [{}]",
            rank + 1,
            opportunity.cycle.path(),
            opportunity.net_pct.round_dp(4),
            opportunity.est_profit_abs.round_dp(6),
            opportunity.start_currency(),
            venues.join(", ")
        );
    }
    println!("======================================================================");

    Ok(())
}

/// Run the engine loop.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.dry_run { "SIMULATION" } else { "LIVE TRADING" });
    info!("Min profit: {}%", config.min_profit_pct);
    info!("Trade notional: {}", config.trade_notional);

    if config.metrics_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
        info!("Metrics exporter listening on {}", addr);
    }

    let telemetry = telemetry(&config)?;
    let (connectors, credentials) = connectors(&config).await?;
    let connectors = Arc::new(connectors);
    let blacklist = blacklist(&config);

    let scanner = scanner(&config, &connectors, blacklist.clone(), telemetry.clone());
    let venues = scanner.venues();
    let executor = SwapExecutor::new(
        connectors.clone(),
        BalanceProvider::standard(connectors, Arc::new(credentials)),
        blacklist,
        MirrorGuard::new(config.mirror_config(), telemetry.clone()),
        telemetry.clone(),
        config.executor_config(),
    );
    let engine = Engine::new(
        scanner,
        executor,
        config.max_concurrent_plans,
        Duration::from_millis(config.scan_interval_ms),
        telemetry,
    );

    let app_state = AppState::new(venues, config.dry_run, engine.stats());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    app_state.set_ready(true);
    engine.run(shutdown_signal()).await;
    app_state.set_ready(false);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("HTTP server error: {}", e),
        Err(e) => warn!("HTTP server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
