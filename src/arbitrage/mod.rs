//! Arbitrage module: from market edges to ranked opportunities.
//!
//! This module handles:
//! - Cycle representation and validation
//! - Negative-cycle detection (Bellman-Ford in log space)
//! - The pair blacklist
//! - Filtering and ranking
//! - Scan iterations across venues

pub mod blacklist;
pub mod cycle;
pub mod detector;
pub mod filter;
pub mod scanner;

pub use blacklist::{Blacklist, BlacklistEntry};
pub use cycle::Cycle;
pub use detector::{CycleDetector, DetectorConfig};
pub use filter::{FilterConfig, FilterReport, Opportunity, OpportunityFilter};
pub use scanner::{fetch_snapshot, ScanConfig, ScanOutcome, Scanner};
