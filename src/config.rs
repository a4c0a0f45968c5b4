//! Application configuration loaded from environment variables.
//!
//! The engine receives a single resolved [`Config`]; each component takes its own
//! projection (`filter_config()`, `executor_config()`, ...) so it can be built and
//! tested without the whole configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::arbitrage::blacklist::BlacklistEntry;
use crate::arbitrage::detector::DetectorConfig;
use crate::arbitrage::filter::FilterConfig;
use crate::arbitrage::scanner::ScanConfig;
use crate::execution::mirror::MirrorConfig;
use crate::execution::supervisor::SupervisorConfig;
use crate::execution::swap::ExecutorConfig;
use crate::venue::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Venues ===
    /// Venue ids to scan (comma separated).
    #[serde(default)]
    pub venues: Vec<String>,

    /// Simulation mode (paper venues, no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// JSON snapshot file used to seed paper venues in dry-run.
    #[serde(default)]
    pub paper_snapshot_path: Option<String>,

    // === Detection ===
    /// Anchor currency for triangular search and anchor consistency.
    #[serde(default)]
    pub anchor_currency: Option<String>,

    /// Only consider 3-hop cycles through the anchor.
    #[serde(default)]
    pub triangular_only: bool,

    /// Also scan the merged cross-venue graph.
    #[serde(default)]
    pub cross_venue: bool,

    /// Log-space acceptance margin; cycles must weigh below `-epsilon`.
    #[serde(default = "default_epsilon")]
    pub detection_epsilon: f64,

    // === Filtering ===
    /// Blacklist entries as `venue:pair:reason`.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// File receiving newly appended blacklist entries.
    #[serde(default)]
    pub blacklist_journal_path: Option<String>,

    /// Minimum net profit percentage.
    #[serde(default = "default_min_profit_pct")]
    pub min_profit_pct: Decimal,

    /// Minimum absolute profit on `trade_notional`, in start currency units.
    #[serde(default)]
    pub min_profit_abs: Decimal,

    /// Notional used to estimate absolute profit.
    #[serde(default = "default_trade_notional")]
    pub trade_notional: Decimal,

    /// Fee/slippage buffer subtracted per hop, in percent.
    #[serde(default = "default_buffer_pct")]
    pub fee_slippage_buffer_pct: Decimal,

    /// Minimum top-of-book liquidity per edge, in the edge's `from` units.
    #[serde(default)]
    pub min_edge_liquidity: Decimal,

    /// Opportunities reported per iteration in simulation mode.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    // === Execution ===
    /// Upper bound for the first hop's input amount.
    #[serde(default)]
    pub trade_ceiling: Option<Decimal>,

    /// Dust threshold relative to the original input.
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: Decimal,

    /// Pause after each hop before reading balances.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Timeout for order placement and settlement polling.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Order status polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub order_poll_interval_ms: u64,

    /// Submission attempts per hop.
    #[serde(default = "default_hop_max_attempts")]
    pub hop_max_attempts: u32,

    /// Amount reduction for the one-shot retry on insufficient position.
    #[serde(default = "default_insufficient_retry_fraction")]
    pub insufficient_retry_fraction: Decimal,

    /// Limit price tolerance around the book price.
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,

    /// Plans allowed to execute at the same time.
    #[serde(default = "default_max_concurrent_plans")]
    pub max_concurrent_plans: usize,

    // === Mirror guard ===
    /// Seconds before a resting mirror order may be re-emitted.
    #[serde(default = "default_mirror_ttl_s")]
    pub mirror_ttl_s: u64,

    /// Offset from mid for mirror pricing.
    #[serde(default = "default_mirror_safety_margin")]
    pub mirror_safety_margin: Decimal,

    /// Offset from the entry price capping re-emitted prices.
    #[serde(default = "default_mirror_entry_offset")]
    pub mirror_entry_offset: Decimal,

    /// Worst acceptable deviation from the entry price.
    #[serde(default = "default_mirror_protective_offset")]
    pub mirror_protective_offset: Decimal,

    /// Maximum re-emissions per mirror order.
    #[serde(default = "default_mirror_max_reemits")]
    pub mirror_max_reemits: u32,

    /// Interval between mirror checks.
    #[serde(default = "default_mirror_check_interval_ms")]
    pub mirror_check_interval_ms: u64,

    /// Seconds after which monitoring stops and the order is left resting.
    #[serde(default = "default_mirror_max_lifetime_s")]
    pub mirror_max_lifetime_s: u64,

    // === Supervisor ===
    /// Detection worker timeout.
    #[serde(default = "default_detector_timeout_ms")]
    pub detector_timeout_ms: u64,

    /// Fallback worker timeout.
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,

    // === Scanning ===
    /// Concurrent venue fetch workers.
    #[serde(default = "default_scan_pool_size")]
    pub scan_pool_size: usize,

    /// Pause between scan iterations.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Order book depth requested per symbol.
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,

    // === Connector boundary ===
    /// Requests per second per venue.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Attempts for transient connector errors.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Initial retry backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    // === Observability ===
    /// JSON-lines telemetry file.
    #[serde(default)]
    pub telemetry_path: Option<String>,

    /// Install the Prometheus exporter.
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// HTTP server port for health/status endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

fn default_epsilon() -> f64 {
    1e-9
}

fn default_min_profit_pct() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_trade_notional() -> Decimal {
    Decimal::new(100, 0)
}

fn default_buffer_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02% per hop
}

fn default_top_n() -> usize {
    5
}

fn default_dust_threshold() -> Decimal {
    Decimal::new(2, 2) // 2% of the original input
}

fn default_settle_delay_ms() -> u64 {
    250
}

fn default_order_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_hop_max_attempts() -> u32 {
    3
}

fn default_insufficient_retry_fraction() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(3, 3) // 0.3%
}

fn default_max_concurrent_plans() -> usize {
    1
}

fn default_mirror_ttl_s() -> u64 {
    30
}

fn default_mirror_safety_margin() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

fn default_mirror_entry_offset() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_mirror_protective_offset() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_mirror_max_reemits() -> u32 {
    3
}

fn default_mirror_check_interval_ms() -> u64 {
    1000
}

fn default_mirror_max_lifetime_s() -> u64 {
    600
}

fn default_detector_timeout_ms() -> u64 {
    2000
}

fn default_fallback_timeout_ms() -> u64 {
    5000
}

fn default_scan_pool_size() -> usize {
    4
}

fn default_scan_interval_ms() -> u64 {
    1000
}

fn default_book_depth() -> usize {
    5
}

fn default_rate_limit_per_sec() -> u32 {
    10
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venues: Vec::new(),
            dry_run: true,
            paper_snapshot_path: None,
            anchor_currency: None,
            triangular_only: false,
            cross_venue: false,
            detection_epsilon: default_epsilon(),
            blacklist: Vec::new(),
            blacklist_journal_path: None,
            min_profit_pct: default_min_profit_pct(),
            min_profit_abs: Decimal::ZERO,
            trade_notional: default_trade_notional(),
            fee_slippage_buffer_pct: default_buffer_pct(),
            min_edge_liquidity: Decimal::ZERO,
            top_n: default_top_n(),
            trade_ceiling: None,
            dust_threshold: default_dust_threshold(),
            settle_delay_ms: default_settle_delay_ms(),
            order_timeout_ms: default_order_timeout_ms(),
            order_poll_interval_ms: default_poll_interval_ms(),
            hop_max_attempts: default_hop_max_attempts(),
            insufficient_retry_fraction: default_insufficient_retry_fraction(),
            slippage_tolerance: default_slippage_tolerance(),
            max_concurrent_plans: default_max_concurrent_plans(),
            mirror_ttl_s: default_mirror_ttl_s(),
            mirror_safety_margin: default_mirror_safety_margin(),
            mirror_entry_offset: default_mirror_entry_offset(),
            mirror_protective_offset: default_mirror_protective_offset(),
            mirror_max_reemits: default_mirror_max_reemits(),
            mirror_check_interval_ms: default_mirror_check_interval_ms(),
            mirror_max_lifetime_s: default_mirror_max_lifetime_s(),
            detector_timeout_ms: default_detector_timeout_ms(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
            scan_pool_size: default_scan_pool_size(),
            scan_interval_ms: default_scan_interval_ms(),
            book_depth: default_book_depth(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            telemetry_path: None,
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.dry_run && self.venues.is_empty() {
            return Err("VENUES is required for live trading".to_string());
        }

        if !self.detection_epsilon.is_finite() || self.detection_epsilon < 0.0 {
            return Err("DETECTION_EPSILON must be a non-negative number".to_string());
        }

        if self.triangular_only && self.anchor_currency.is_none() {
            return Err("TRIANGULAR_ONLY requires ANCHOR_CURRENCY".to_string());
        }

        if self.dust_threshold < Decimal::ZERO || self.dust_threshold >= Decimal::ONE {
            return Err("DUST_THRESHOLD must be in [0, 1)".to_string());
        }

        if self.insufficient_retry_fraction <= Decimal::ZERO
            || self.insufficient_retry_fraction >= Decimal::ONE
        {
            return Err("INSUFFICIENT_RETRY_FRACTION must be in (0, 1)".to_string());
        }

        if self.hop_max_attempts == 0 {
            return Err("HOP_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.scan_pool_size == 0 {
            return Err("SCAN_POOL_SIZE must be at least 1".to_string());
        }

        if self.max_concurrent_plans == 0 {
            return Err("MAX_CONCURRENT_PLANS must be at least 1".to_string());
        }

        if let Some(ceiling) = self.trade_ceiling {
            if ceiling <= Decimal::ZERO {
                return Err("TRADE_CEILING must be positive".to_string());
            }
        }

        for raw in &self.blacklist {
            BlacklistEntry::parse(raw)?;
        }

        Ok(())
    }

    /// Parsed blacklist entries; malformed entries are skipped (see `validate`).
    pub fn blacklist_entries(&self) -> Vec<BlacklistEntry> {
        self.blacklist
            .iter()
            .filter_map(|raw| BlacklistEntry::parse(raw).ok())
            .collect()
    }

    /// Anchor currency, uppercased.
    pub fn anchor(&self) -> Option<String> {
        self.anchor_currency.as_ref().map(|a| a.to_uppercase())
    }

    /// Detector settings.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            epsilon: self.detection_epsilon,
            triangular_anchor: if self.triangular_only {
                self.anchor()
            } else {
                None
            },
        }
    }

    /// Filter and ranker settings.
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            min_edge_liquidity: self.min_edge_liquidity,
            min_profit_pct: self.min_profit_pct,
            min_profit_abs: self.min_profit_abs,
            trade_notional: self.trade_notional,
            fee_slippage_buffer_pct: self.fee_slippage_buffer_pct,
            anchor: self.anchor(),
            top_n: if self.dry_run { self.top_n.max(1) } else { 1 },
        }
    }

    /// Swap executor settings.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            trade_ceiling: self.trade_ceiling,
            dust_threshold: self.dust_threshold,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            order_timeout: Duration::from_millis(self.order_timeout_ms),
            poll_interval: Duration::from_millis(self.order_poll_interval_ms),
            hop_max_attempts: self.hop_max_attempts,
            insufficient_retry_fraction: self.insufficient_retry_fraction,
            slippage_tolerance: self.slippage_tolerance,
        }
    }

    /// Mirror guard settings.
    pub fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            ttl: Duration::from_secs(self.mirror_ttl_s),
            safety_margin: self.mirror_safety_margin,
            entry_offset: self.mirror_entry_offset,
            protective_offset: self.mirror_protective_offset,
            max_reemits: self.mirror_max_reemits,
            check_interval: Duration::from_millis(self.mirror_check_interval_ms),
            max_lifetime: Duration::from_secs(self.mirror_max_lifetime_s),
        }
    }

    /// Supervisor settings.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            timeout: Duration::from_millis(self.detector_timeout_ms),
            fallback_timeout: Duration::from_millis(self.fallback_timeout_ms),
        }
    }

    /// Scanner settings.
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            pool_size: self.scan_pool_size,
            book_depth: self.book_depth,
            cross_venue: self.cross_venue,
            live: !self.dry_run,
        }
    }

    /// Connector retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }
}

/// API credentials for one venue.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Optional passphrase.
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Read `<VENUE>_API_KEY`, `<VENUE>_API_SECRET` and `<VENUE>_API_PASSPHRASE`.
    ///
    /// Returns `None` unless both key and secret are present and non-empty.
    pub fn from_env(venue: &str) -> Option<Self> {
        let prefix = venue.to_uppercase().replace('-', "_");
        let read = |suffix: &str| {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };

        Some(Self {
            api_key: read("API_KEY")?,
            api_secret: read("API_SECRET")?,
            passphrase: read("API_PASSPHRASE"),
        })
    }

    /// Placeholder credentials for paper venues.
    pub fn paper() -> Self {
        Self {
            api_key: "paper".to_string(),
            api_secret: "paper".to_string(),
            passphrase: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        let config = Config::default();
        assert!(config.dry_run);
        assert_eq!(config.min_profit_pct, dec!(0.1));
        assert_eq!(config.insufficient_retry_fraction, dec!(0.005));
        assert_eq!(config.max_concurrent_plans, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_live_without_venues() {
        let config = Config {
            dry_run: false,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_triangular_without_anchor() {
        let config = Config {
            triangular_only: true,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_blacklist() {
        let config = Config {
            blacklist: vec!["binance".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_mode_emits_single_plan() {
        let config = Config {
            dry_run: false,
            venues: vec!["binance".to_string()],
            top_n: 10,
            ..Config::default()
        };
        assert_eq!(config.filter_config().top_n, 1);
        assert!(config.scan_config().live);

        let sim = Config {
            top_n: 10,
            ..Config::default()
        };
        assert_eq!(sim.filter_config().top_n, 10);
    }

    #[test]
    fn triangular_anchor_is_uppercased() {
        let config = Config {
            triangular_only: true,
            anchor_currency: Some("usdt".to_string()),
            ..Config::default()
        };
        assert_eq!(config.detector_config().triangular_anchor.as_deref(), Some("USDT"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::paper();
        let printed = format!("{creds:?}");
        assert!(!printed.contains("paper"));
    }
}
