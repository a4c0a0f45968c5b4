//! HTTP API handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::{EngineStats, SharedStats};

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Whether the engine is scanning.
    pub ready: Arc<AtomicBool>,
    /// Venues the engine scans.
    pub venues: Arc<Vec<String>>,
    /// Whether orders are simulated.
    pub dry_run: bool,
    /// Engine stats.
    pub stats: SharedStats,
}

impl AppState {
    /// Create app state around an engine's stats handle.
    pub fn new(venues: Vec<String>, dry_run: bool, stats: SharedStats) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            venues: Arc::new(venues),
            dry_run,
            stats,
        }
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the engine is scanning.
    pub ready: bool,
    /// Venue count.
    pub venues: usize,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// "running" or "starting".
    pub status: &'static str,
    /// "paper" or "live".
    pub mode: &'static str,
    /// Scanned venues.
    pub venues: Vec<String>,
    /// Engine counters.
    pub stats: EngineStats,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        venues: state.venues.len(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns engine status and counters.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stats.read().await.clone();

    Json(StatusResponse {
        status: if state.is_ready() { "running" } else { "starting" },
        mode: if state.dry_run { "paper" } else { "live" },
        venues: state.venues.to_vec(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_ready_toggle() {
        let state = AppState::new(vec!["alpha".to_string()], true, SharedStats::default());
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }
}
