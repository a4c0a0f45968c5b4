//! Prometheus metrics for the scan loop and execution.
//!
//! Metric names live here as constants; call sites use the small helpers below so
//! labels stay consistent. With no recorder installed every call is a no-op.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Scan phase duration metric name, labelled by phase.
pub const METRIC_PHASE_DURATION: &str = "scan_phase_duration_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Connector retries counter metric name.
pub const METRIC_CONNECTOR_RETRIES: &str = "connector_retries_total";
/// Scan iterations counter metric name.
pub const METRIC_SCAN_ITERATIONS: &str = "scan_iterations_total";
/// Negative cycles detected counter metric name.
pub const METRIC_CYCLES_DETECTED: &str = "cycles_detected_total";
/// Opportunities surviving the filter counter metric name.
pub const METRIC_OPPORTUNITIES_RANKED: &str = "opportunities_ranked_total";
/// Pairs rejected during graph build counter metric name.
pub const METRIC_PAIRS_REJECTED: &str = "pairs_rejected_total";
/// Detector timeouts counter metric name.
pub const METRIC_DETECTOR_TIMEOUTS: &str = "detector_timeouts_total";
/// Fallback runs counter metric name.
pub const METRIC_DETECTOR_FALLBACKS: &str = "detector_fallbacks_total";
/// Plans finished counter metric name, labelled by terminal state.
pub const METRIC_PLANS_FINISHED: &str = "plans_finished_total";
/// Mirror re-emissions counter metric name.
pub const METRIC_MIRROR_REEMITS: &str = "mirror_reemits_total";
/// Blacklist appends counter metric name.
pub const METRIC_BLACKLIST_APPENDS: &str = "blacklist_appends_total";
/// Best net profit of the last iteration.
pub const METRIC_BEST_NET_PROFIT_PCT: &str = "best_net_profit_pct";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );
    describe_histogram!(
        METRIC_PHASE_DURATION,
        "Duration of each scan phase in milliseconds"
    );

    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders filled");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(
        METRIC_CONNECTOR_RETRIES,
        "Connector calls retried after a transient error"
    );
    describe_counter!(METRIC_SCAN_ITERATIONS, "Completed scan iterations");
    describe_counter!(METRIC_CYCLES_DETECTED, "Negative cycles found by the detector");
    describe_counter!(
        METRIC_OPPORTUNITIES_RANKED,
        "Cycles that survived filtering"
    );
    describe_counter!(
        METRIC_PAIRS_REJECTED,
        "Pairs left out of the graph for missing metadata"
    );
    describe_counter!(METRIC_DETECTOR_TIMEOUTS, "Detection runs that timed out");
    describe_counter!(METRIC_DETECTOR_FALLBACKS, "Detection runs retried in the fallback worker");
    describe_counter!(METRIC_PLANS_FINISHED, "Swap plans reaching a terminal state");
    describe_counter!(METRIC_MIRROR_REEMITS, "Mirror orders re-emitted after TTL");
    describe_counter!(METRIC_BLACKLIST_APPENDS, "Pairs blacklisted at runtime");

    debug!("Metrics initialized");
}

/// Record how long a scan phase took.
pub fn record_phase_duration(phase: &str, duration_ms: f64) {
    histogram!(METRIC_PHASE_DURATION, "phase" => phase.to_string()).record(duration_ms);
}

/// Increment order submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders filled counter.
pub fn inc_orders_filled() {
    counter!(METRIC_ORDERS_FILLED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Increment the connector retry counter for a venue.
pub fn inc_connector_retries(venue: &str) {
    counter!(METRIC_CONNECTOR_RETRIES, "venue" => venue.to_string()).increment(1);
}

/// Increment scan iterations counter.
pub fn inc_scan_iterations() {
    counter!(METRIC_SCAN_ITERATIONS).increment(1);
}

/// Add detected cycles.
pub fn add_cycles_detected(count: usize) {
    counter!(METRIC_CYCLES_DETECTED).increment(count as u64);
}

/// Add ranked opportunities.
pub fn add_opportunities_ranked(count: usize) {
    counter!(METRIC_OPPORTUNITIES_RANKED).increment(count as u64);
}

/// Add rejected pairs for a venue.
pub fn add_pairs_rejected(venue: &str, count: usize) {
    counter!(METRIC_PAIRS_REJECTED, "venue" => venue.to_string()).increment(count as u64);
}

/// Increment detector timeouts counter.
pub fn inc_detector_timeouts() {
    counter!(METRIC_DETECTOR_TIMEOUTS).increment(1);
}

/// Increment detector fallbacks counter.
pub fn inc_detector_fallbacks() {
    counter!(METRIC_DETECTOR_FALLBACKS).increment(1);
}

/// Increment finished plans for a terminal state.
pub fn inc_plans_finished(state: &str) {
    counter!(METRIC_PLANS_FINISHED, "state" => state.to_string()).increment(1);
}

/// Increment mirror re-emissions counter.
pub fn inc_mirror_reemits() {
    counter!(METRIC_MIRROR_REEMITS).increment(1);
}

/// Increment blacklist appends counter.
pub fn inc_blacklist_appends() {
    counter!(METRIC_BLACKLIST_APPENDS).increment(1);
}

/// Publish the best net profit seen in the last iteration.
pub fn set_best_net_profit_pct(pct: f64) {
    gauge!(METRIC_BEST_NET_PROFIT_PCT).set(pct);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for order submission.
pub fn timer_order_submit() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDER_SUBMIT_LATENCY)
}
