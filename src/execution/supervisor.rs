//! Supervised execution of CPU-bound jobs.
//!
//! Jobs run on the blocking pool under a wall-clock timeout. A job that times out or
//! panics has its cancel flag raised and is run once more in a fallback worker with
//! its own timeout. Only one fallback runs at a time across the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::error::SupervisorError;
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};

/// A job the supervisor can run more than once. It should return promptly once the
/// flag it is given is set.
pub type Job<T> = Arc<dyn Fn(&AtomicBool) -> T + Send + Sync>;

/// Supervisor timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Limit for the primary worker.
    pub timeout: Duration,
    /// Limit for the fallback worker.
    pub fallback_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            fallback_timeout: Duration::from_secs(5),
        }
    }
}

/// Job result, flagged when the fallback produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Supervised<T> {
    /// Job output.
    pub value: T,
    /// Whether the fallback worker produced it.
    pub fallback: bool,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
    fallbacks: AtomicU64,
    fallback_failures: AtomicU64,
}

/// Point-in-time supervisor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    /// Jobs started.
    pub runs: u64,
    /// Primary workers that timed out.
    pub timeouts: u64,
    /// Primary workers that panicked.
    pub panics: u64,
    /// Fallback runs.
    pub fallbacks: u64,
    /// Fallback runs that failed too.
    pub fallback_failures: u64,
}

/// Runs jobs with timeout and fallback.
#[derive(Debug, Clone)]
pub struct ExecutionSupervisor {
    config: SupervisorConfig,
    fallback_slot: Arc<Semaphore>,
    counters: Arc<Counters>,
    telemetry: TelemetryRecorder,
}

impl ExecutionSupervisor {
    /// Create a supervisor.
    pub fn new(config: SupervisorConfig, telemetry: TelemetryRecorder) -> Self {
        Self {
            config,
            fallback_slot: Arc::new(Semaphore::new(1)),
            counters: Arc::new(Counters::default()),
            telemetry,
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            fallback_failures: self.counters.fallback_failures.load(Ordering::Relaxed),
        }
    }

    /// Run `job`, falling back once if the primary worker times out or panics.
    #[instrument(skip(self, job))]
    pub async fn run<T>(&self, label: &str, job: Job<T>) -> Result<Supervised<T>, SupervisorError>
    where
        T: Send + 'static,
    {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);

        let primary = match self.attempt(job.clone(), self.config.timeout).await {
            Ok(value) => {
                return Ok(Supervised {
                    value,
                    fallback: false,
                })
            }
            Err(failure) => failure,
        };

        match primary {
            Failure::TimedOut => self.counters.timeouts.fetch_add(1, Ordering::Relaxed),
            Failure::Panicked(_) => self.counters.panics.fetch_add(1, Ordering::Relaxed),
        };
        let primary = primary.to_string();
        warn!(label, reason = %primary, "Worker abandoned, running fallback");
        self.telemetry.record(TelemetryEvent::SupervisorTimeout {
            label: label.to_string(),
            reason: primary.clone(),
        });

        let _permit = self
            .fallback_slot
            .acquire()
            .await
            .map_err(|_| SupervisorError::FallbackFailed {
                label: label.to_string(),
                primary: primary.clone(),
                reason: "fallback slot closed".to_string(),
            })?;
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);

        let outcome = self.attempt(job, self.config.fallback_timeout).await;
        self.telemetry.record(TelemetryEvent::SupervisorFallback {
            label: label.to_string(),
            succeeded: outcome.is_ok(),
        });

        match outcome {
            Ok(value) => {
                info!(label, "Fallback worker succeeded");
                Ok(Supervised {
                    value,
                    fallback: true,
                })
            }
            Err(failure) => {
                self.counters.fallback_failures.fetch_add(1, Ordering::Relaxed);
                error!(label, primary = %primary, reason = %failure, "Fallback worker failed");
                Err(SupervisorError::FallbackFailed {
                    label: label.to_string(),
                    primary,
                    reason: failure.to_string(),
                })
            }
        }
    }

    async fn attempt<T>(&self, job: Job<T>, limit: Duration) -> Result<T, Failure>
    where
        T: Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || job(&*flag));

        match timeout(limit, handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Failure::Panicked(e.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(Failure::TimedOut)
            }
        }
    }
}

#[derive(Debug)]
enum Failure {
    TimedOut,
    Panicked(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::TimedOut => write!(f, "timed out"),
            Failure::Panicked(e) => write!(f, "worker panicked: {e}"),
        }
    }
}
