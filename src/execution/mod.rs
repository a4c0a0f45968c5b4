//! Execution module: turning an opportunity into orders.
//!
//! This module handles:
//! - Swap plans and the plan state machine
//! - Hop-by-hop execution with per-class error handling
//! - Last-hop dust protection
//! - Supervised detection workers

pub mod mirror;
pub mod plan;
pub mod supervisor;
pub mod swap;

pub use mirror::{MirrorConfig, MirrorGuard, MirrorOrder, MirrorStatus};
pub use plan::{Hop, HopRecord, HopStatus, PlanState, SwapPlan};
pub use supervisor::{ExecutionSupervisor, SupervisorConfig, SupervisorStats};
pub use swap::{ExecutorConfig, SwapExecutor};
