//! The scan-and-execute loop.
//!
//! Each tick runs one scan. When the best opportunity stays on a single venue and
//! an execution slot is free, it is executed on a spawned task that holds the
//! slot until the plan finishes; scanning never waits for execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::arbitrage::{Opportunity, Scanner};
use crate::error::BotError;
use crate::execution::{PlanState, SupervisorStats, SwapExecutor};
use crate::telemetry::{Phase, TelemetryRecorder};

/// How long shutdown waits for in-flight plans.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Engine counters served by the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Scan iterations run.
    pub iterations: u64,
    /// Iterations that failed.
    pub scan_failures: u64,
    /// Opportunities that passed filtering.
    pub opportunities_found: u64,
    /// Plans handed to the executor.
    pub plans_started: u64,
    /// Plans that completed.
    pub plans_completed: u64,
    /// Plans that aborted.
    pub plans_aborted: u64,
    /// Opportunities skipped because every slot was busy.
    pub skipped_busy: u64,
    /// Opportunities skipped because they span several venues.
    pub skipped_cross_venue: u64,
    /// Net profit of the last iteration's best opportunity, in percent.
    pub best_net_pct: Option<Decimal>,
    /// Path of the last executed plan.
    pub last_plan: Option<String>,
    /// Detection supervisor counters.
    pub supervisor: SupervisorStats,
}

/// Stats handle shared with the HTTP API.
pub type SharedStats = Arc<RwLock<EngineStats>>;

/// Scanner plus executor.
#[derive(Debug)]
pub struct Engine {
    scanner: Arc<Scanner>,
    executor: Arc<SwapExecutor>,
    slots: Arc<Semaphore>,
    max_plans: u32,
    scan_interval: Duration,
    stats: SharedStats,
    telemetry: TelemetryRecorder,
}

impl Engine {
    /// Create an engine allowing `max_concurrent_plans` plans at once.
    pub fn new(
        scanner: Scanner,
        executor: SwapExecutor,
        max_concurrent_plans: usize,
        scan_interval: Duration,
        telemetry: TelemetryRecorder,
    ) -> Self {
        let max_plans = u32::try_from(max_concurrent_plans.max(1)).unwrap_or(u32::MAX);
        Self {
            scanner: Arc::new(scanner),
            executor: Arc::new(executor),
            slots: Arc::new(Semaphore::new(max_plans as usize)),
            max_plans,
            scan_interval,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            telemetry,
        }
    }

    /// Stats handle.
    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Scanner.
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Run one scan and start executing the best single-venue opportunity.
    ///
    /// Returns the handle of the spawned execution task.
    #[instrument(skip(self))]
    pub async fn run_iteration(&self) -> Result<Option<JoinHandle<()>>, BotError> {
        let outcome = self.scanner.scan_once().await;
        let supervisor = self.scanner.supervisor_stats();

        let outcome = {
            let mut stats = self.stats.write().await;
            stats.iterations += 1;
            stats.supervisor = supervisor;
            match outcome {
                Ok(outcome) => {
                    stats.opportunities_found += outcome.opportunities.len() as u64;
                    stats.best_net_pct = outcome.opportunities.first().map(|o| o.net_pct);
                    outcome
                }
                Err(e) => {
                    stats.scan_failures += 1;
                    return Err(e);
                }
            }
        };

        // Ranked best first; cross-venue cycles ahead of the pick are skipped.
        let mut ranked = outcome.opportunities.into_iter();
        let mut skipped = 0u64;
        let best = loop {
            match ranked.next() {
                Some(o) if o.cycle.is_single_venue() => break Some(o),
                Some(o) => {
                    debug!(path = %o.cycle.path(), "Opportunity spans venues, not executing");
                    skipped += 1;
                }
                None => break None,
            }
        };
        if skipped > 0 {
            self.stats.write().await.skipped_cross_venue += skipped;
        }
        let Some(best) = best else {
            return Ok(None);
        };

        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            debug!(path = %best.cycle.path(), "Execution slots busy, skipping");
            self.stats.write().await.skipped_busy += 1;
            return Ok(None);
        };

        {
            let mut stats = self.stats.write().await;
            stats.plans_started += 1;
            stats.last_plan = Some(best.cycle.path());
        }

        let executor = self.executor.clone();
        let stats = self.stats.clone();
        let telemetry = self.telemetry.clone();
        let iteration = outcome.iteration;
        Ok(Some(tokio::spawn(async move {
            let _permit = permit;
            execute(executor, stats, telemetry, iteration, best).await;
        })))
    }

    /// Loop until `shutdown` resolves, then cancel mirror orders and wait for
    /// in-flight plans.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            venues = ?self.scanner.venues(),
            interval_ms = self.scan_interval.as_millis() as u64,
            "Engine started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_iteration().await {
                        error!(error = %e, "Scan iteration failed");
                    }
                }
            }
        }

        info!("Engine stopping");
        self.executor.cancel_mirrors();
        match timeout(SHUTDOWN_GRACE, self.slots.acquire_many(self.max_plans)).await {
            Ok(_) => info!("No plans in flight"),
            Err(_) => warn!("Plans still running after shutdown grace period"),
        }
    }
}

async fn execute(
    executor: Arc<SwapExecutor>,
    stats: SharedStats,
    telemetry: TelemetryRecorder,
    iteration: u64,
    opportunity: Opportunity,
) {
    let started = Instant::now();
    let venue = opportunity
        .cycle
        .venues()
        .into_iter()
        .next()
        .map(str::to_string);
    let result = executor.execute(&opportunity).await;
    telemetry.phase(iteration, venue.as_deref(), Phase::Execution, started.elapsed());

    let mut stats = stats.write().await;
    match result {
        Ok(plan) if plan.state == PlanState::Completed => {
            info!(plan = %plan.id, realized = %plan.realized_product(), "Plan completed");
            stats.plans_completed += 1;
        }
        Ok(plan) => {
            warn!(plan = %plan.id, state = %plan.state, "Plan did not complete");
            stats.plans_aborted += 1;
        }
        Err(e) => {
            error!(error = %e, "Plan could not be built");
            stats.plans_aborted += 1;
        }
    }
}
