//! Passive telemetry: every stage reports here, nothing reads it back.
//!
//! Events are timestamped and written to a [`TelemetrySink`]; counters and
//! durations are mirrored to the metrics facade. Sink failures are logged and
//! swallowed.

pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;

use crate::arbitrage::blacklist::BlacklistEntry;
use crate::arbitrage::filter::FilterReport;
use crate::arbitrage::Opportunity;
use crate::execution::plan::{AbortReport, HopRecord, PlanState, SwapPlan};
use crate::metrics;

pub use sink::{JsonLinesSink, MemorySink, NullSink, TelemetrySink};

/// Timed stages of a scan iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Venue fetch and edge construction.
    Fetch,
    /// Negative-cycle search.
    Detection,
    /// Filtering and ranking.
    Filtering,
    /// Plan execution.
    Execution,
}

/// Compact view of a ranked opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunitySummary {
    /// Currency path.
    pub path: String,
    /// Venues involved.
    pub venues: Vec<String>,
    /// Hop count.
    pub hops: usize,
    /// Net profit in percent.
    pub net_pct: Decimal,
    /// Estimated absolute profit.
    pub est_profit_abs: Decimal,
}

impl From<&Opportunity> for OpportunitySummary {
    fn from(opportunity: &Opportunity) -> Self {
        Self {
            path: opportunity.cycle.path(),
            venues: opportunity
                .cycle
                .venues()
                .into_iter()
                .map(str::to_string)
                .collect(),
            hops: opportunity.cycle.hop_count(),
            net_pct: opportunity.net_pct,
            est_profit_abs: opportunity.est_profit_abs,
        }
    }
}

/// Something worth recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A phase finished.
    Phase {
        /// Scan iteration.
        iteration: u64,
        /// Venue, when the phase ran per venue.
        venue: Option<String>,
        /// Which phase.
        phase: Phase,
        /// Wall-clock duration.
        duration_ms: f64,
    },
    /// A venue snapshot was turned into edges.
    Graph {
        /// Scan iteration.
        iteration: u64,
        /// Venue id.
        venue: String,
        /// Edges built.
        edges: usize,
        /// Pairs rejected.
        rejected: usize,
    },
    /// A venue could not be fetched.
    FetchFailed {
        /// Scan iteration.
        iteration: u64,
        /// Venue id.
        venue: String,
        /// Error message.
        error: String,
    },
    /// Detection finished for one scope (a venue or `cross`).
    Detection {
        /// Scan iteration.
        iteration: u64,
        /// Venue id or `cross`.
        scope: String,
        /// Distinct cycles found.
        cycles: usize,
        /// Whether the fallback worker produced the result.
        fallback: bool,
    },
    /// Filtering finished.
    Filtered {
        /// Scan iteration.
        iteration: u64,
        /// Per-stage counts.
        report: FilterReport,
        /// Survivors, best first.
        opportunities: Vec<OpportunitySummary>,
    },
    /// The supervisor abandoned a worker.
    SupervisorTimeout {
        /// Job label.
        label: String,
        /// What went wrong.
        reason: String,
    },
    /// The supervisor ran the fallback worker.
    SupervisorFallback {
        /// Job label.
        label: String,
        /// Whether the fallback succeeded.
        succeeded: bool,
    },
    /// A plan reached a terminal state.
    PlanFinished {
        /// Plan id.
        plan_id: String,
        /// Terminal state.
        state: PlanState,
        /// Currency path.
        start_currency: String,
        /// Per-hop records.
        hops: Vec<HopRecord>,
        /// Realized rate product.
        realized_product: Decimal,
        /// Product expected at detection time.
        expected_product: f64,
        /// Notes attached during execution.
        annotations: Vec<String>,
        /// Abort details.
        abort: Option<AbortReport>,
    },
    /// A mirror order was placed or re-placed.
    MirrorEmitted {
        /// Plan id.
        plan_id: String,
        /// Instrument symbol.
        symbol: String,
        /// Limit price.
        price: Decimal,
        /// Re-emissions so far.
        reemit_count: u32,
    },
    /// A pair was blacklisted at runtime.
    Blacklisted {
        /// The new entry.
        entry: BlacklistEntry,
    },
}

/// An event with its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// When it was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// The event.
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

/// Cloneable handle every component records through.
#[derive(Clone)]
pub struct TelemetryRecorder {
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder").finish_non_exhaustive()
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::null()
    }
}

impl TelemetryRecorder {
    /// Record into `sink`.
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Discard every event.
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Record an event.
    pub fn record(&self, event: TelemetryEvent) {
        mirror_to_metrics(&event);
        self.sink.write(&TelemetryRecord {
            at: OffsetDateTime::now_utc(),
            event,
        });
    }

    /// Record a phase duration.
    pub fn phase(&self, iteration: u64, venue: Option<&str>, phase: Phase, elapsed: Duration) {
        self.record(TelemetryEvent::Phase {
            iteration,
            venue: venue.map(str::to_string),
            phase,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        });
    }

    /// Record a plan's terminal state.
    pub fn plan_finished(&self, plan: &SwapPlan) {
        self.record(TelemetryEvent::PlanFinished {
            plan_id: plan.id.clone(),
            state: plan.state,
            start_currency: plan.start_currency.clone(),
            hops: plan.records.clone(),
            realized_product: plan.realized_product(),
            expected_product: plan.expected_product,
            annotations: plan.annotations.clone(),
            abort: plan.abort.clone(),
        });
    }
}

fn mirror_to_metrics(event: &TelemetryEvent) {
    match event {
        TelemetryEvent::Phase { phase, duration_ms, .. } => {
            metrics::record_phase_duration(&phase.to_string(), *duration_ms);
        }
        TelemetryEvent::Graph { venue, rejected, .. } => {
            metrics::add_pairs_rejected(venue, *rejected);
        }
        TelemetryEvent::Detection { cycles, .. } => metrics::add_cycles_detected(*cycles),
        TelemetryEvent::Filtered { report, opportunities, .. } => {
            metrics::inc_scan_iterations();
            metrics::add_opportunities_ranked(report.accepted);
            if let Some(best) = opportunities.first().and_then(|o| o.net_pct.to_f64()) {
                metrics::set_best_net_profit_pct(best);
            }
        }
        TelemetryEvent::SupervisorTimeout { .. } => metrics::inc_detector_timeouts(),
        TelemetryEvent::SupervisorFallback { .. } => metrics::inc_detector_fallbacks(),
        TelemetryEvent::PlanFinished { state, .. } => metrics::inc_plans_finished(&state.to_string()),
        TelemetryEvent::MirrorEmitted { reemit_count, .. } => {
            if *reemit_count > 0 {
                metrics::inc_mirror_reemits();
            }
        }
        TelemetryEvent::Blacklisted { .. } => metrics::inc_blacklist_appends(),
        TelemetryEvent::FetchFailed { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_the_sink() {
        let sink = Arc::new(MemorySink::default());
        let recorder = TelemetryRecorder::new(sink.clone());

        recorder.phase(1, Some("alpha"), Phase::Fetch, Duration::from_millis(12));
        recorder.record(TelemetryEvent::Detection {
            iteration: 1,
            scope: "alpha".to_string(),
            cycles: 2,
            fallback: false,
        });

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0].event,
            TelemetryEvent::Phase { phase: Phase::Fetch, .. }
        ));
    }

    #[test]
    fn records_serialize_flat() {
        let record = TelemetryRecord {
            at: OffsetDateTime::UNIX_EPOCH,
            event: TelemetryEvent::SupervisorFallback {
                label: "detect:alpha".to_string(),
                succeeded: true,
            },
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "supervisor_fallback");
        assert_eq!(json["label"], "detect:alpha");
        assert_eq!(json["at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn null_recorder_accepts_everything() {
        let recorder = TelemetryRecorder::default();
        recorder.phase(0, None, Phase::Execution, Duration::ZERO);
    }
}
