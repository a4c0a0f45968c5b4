//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use thiserror::Error;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Venue connector error.
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    /// Market graph error.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Cycle detection error.
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    /// Swap execution error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Supervised worker error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error taxonomy used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limits, timeouts, network blips. Retried with backoff at the connector.
    Transient,
    /// Venue refused the order for lack of balance/position.
    InsufficientBalance,
    /// Permanent regulatory or account-level rejection for this pair.
    Compliance,
    /// Precision, lot size, minimum amount or notional violations.
    Precision,
    /// Anything else; not retried at the connector boundary.
    Permanent,
}

/// Errors surfaced by venue connectors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    /// Rate limited by the venue.
    #[error("rate limited by {venue}: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Venue id.
        venue: String,
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// Request did not complete in time.
    #[error("{operation} on {venue} timed out")]
    Timeout {
        /// Venue id.
        venue: String,
        /// Operation that timed out.
        operation: String,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Not enough free balance/position to place the order.
    #[error("insufficient position on {venue}: {reason}")]
    InsufficientPosition {
        /// Venue id.
        venue: String,
        /// Venue message.
        reason: String,
    },

    /// Regulatory/compliance rejection; permanent for this pair.
    #[error("compliance rejection on {venue} for {symbol}: {reason}")]
    Compliance {
        /// Venue id.
        venue: String,
        /// Instrument symbol.
        symbol: String,
        /// Venue message.
        reason: String,
    },

    /// Precision or minimum violation.
    #[error("precision violation on {venue}: {reason}")]
    Precision {
        /// Venue id.
        venue: String,
        /// Venue message.
        reason: String,
    },

    /// Order id unknown to the venue.
    #[error("order {order_id} not found")]
    OrderNotFound {
        /// Order id.
        order_id: String,
    },

    /// Symbol not listed on the venue.
    #[error("unknown symbol {symbol} on {venue}")]
    UnknownSymbol {
        /// Venue id.
        venue: String,
        /// Instrument symbol.
        symbol: String,
    },

    /// Authenticated call attempted without credentials.
    #[error("missing credentials for {venue}")]
    MissingCredentials {
        /// Venue id.
        venue: String,
    },

    /// Any other rejection.
    #[error("rejected by {venue}: {reason}")]
    Rejected {
        /// Venue id.
        venue: String,
        /// Venue message.
        reason: String,
    },
}

impl VenueError {
    /// Map the error onto the recovery taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            VenueError::RateLimited { .. } | VenueError::Timeout { .. } | VenueError::Network(_) => {
                ErrorClass::Transient
            }
            VenueError::InsufficientPosition { .. } => ErrorClass::InsufficientBalance,
            VenueError::Compliance { .. } => ErrorClass::Compliance,
            VenueError::Precision { .. } => ErrorClass::Precision,
            VenueError::OrderNotFound { .. }
            | VenueError::UnknownSymbol { .. }
            | VenueError::MissingCredentials { .. }
            | VenueError::Rejected { .. } => ErrorClass::Permanent,
        }
    }

    /// Whether the connector boundary may retry the call.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Build a typed error from a raw venue rejection message.
    ///
    /// Adapters with structured error codes should map those directly; this is the
    /// shared fallback for free-text messages.
    pub fn from_venue_message(venue: &str, symbol: &str, message: &str) -> Self {
        let lower = message.to_lowercase();
        let venue = venue.to_string();
        let reason = message.to_string();

        if lower.contains("too many requests") || lower.contains("rate limit") {
            return VenueError::RateLimited {
                venue,
                retry_after_ms: 1000,
            };
        }
        if lower.contains("insufficient") || lower.contains("not enough") {
            return VenueError::InsufficientPosition { venue, reason };
        }
        if lower.contains("restricted")
            || lower.contains("not permitted")
            || lower.contains("not available in your")
            || lower.contains("compliance")
            || lower.contains("jurisdiction")
        {
            return VenueError::Compliance {
                venue,
                symbol: symbol.to_string(),
                reason,
            };
        }
        if lower.contains("lot_size")
            || lower.contains("min_notional")
            || lower.contains("precision")
            || lower.contains("minimum")
            || lower.contains("too small")
        {
            return VenueError::Precision { venue, reason };
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return VenueError::Timeout {
                venue,
                operation: "request".to_string(),
            };
        }
        VenueError::Rejected { venue, reason }
    }
}

/// Reasons a pair is left out of the market graph.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GraphError {
    /// Amount or price precision not published.
    #[error("{symbol}: missing precision metadata")]
    MissingPrecision {
        /// Instrument symbol.
        symbol: String,
    },

    /// Minimum amount or notional not published.
    #[error("{symbol}: missing minimum order metadata")]
    MissingLimits {
        /// Instrument symbol.
        symbol: String,
    },

    /// Pair is not trading.
    #[error("{symbol}: market inactive")]
    Inactive {
        /// Instrument symbol.
        symbol: String,
    },

    /// No book was fetched for the pair.
    #[error("{symbol}: no order book")]
    MissingBook {
        /// Instrument symbol.
        symbol: String,
    },

    /// Book has no usable quote on one side.
    #[error("{symbol}: empty {side} side")]
    EmptySide {
        /// Instrument symbol.
        symbol: String,
        /// "bid" or "ask".
        side: &'static str,
    },
}

/// Cycle detection errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// Edge sequence does not form a valid cycle.
    #[error("invalid cycle: {0}")]
    InvalidCycle(String),

    /// Detection was abandoned by its supervisor.
    #[error("detection cancelled")]
    Cancelled,
}

/// Swap execution errors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Plan has no hops.
    #[error("swap plan has no hops")]
    EmptyPlan,

    /// Nothing to trade for this hop.
    #[error("no free {currency} on {venue} for hop {hop}")]
    NoBalance {
        /// Hop index.
        hop: usize,
        /// Venue id.
        venue: String,
        /// Currency that was empty.
        currency: String,
    },

    /// Sized order falls below venue minimums.
    #[error("hop {hop} on {symbol} below venue minimum: {reason}")]
    BelowMinimum {
        /// Hop index.
        hop: usize,
        /// Instrument symbol.
        symbol: String,
        /// Which rule failed.
        reason: String,
    },

    /// The order reached a terminal state without filling.
    #[error("hop {hop} order {order_id} ended unfilled")]
    Unfilled {
        /// Hop index.
        hop: usize,
        /// Venue order id.
        order_id: String,
    },

    /// No connector registered for the venue.
    #[error("no connector for venue {venue}")]
    UnknownVenue {
        /// Venue id.
        venue: String,
    },

    /// Another plan holds the execution slot.
    #[error("execution slot busy")]
    Busy,

    /// Venue connector error.
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// Mirror guard error.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

impl ExecutionError {
    /// Map the error onto the recovery taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutionError::Venue(e) => e.class(),
            ExecutionError::Mirror(MirrorError::Venue(e)) => e.class(),
            ExecutionError::BelowMinimum { .. } | ExecutionError::Mirror(_) => ErrorClass::Precision,
            ExecutionError::NoBalance { .. } => ErrorClass::InsufficientBalance,
            ExecutionError::Unfilled { .. } => ErrorClass::Transient,
            ExecutionError::EmptyPlan
            | ExecutionError::UnknownVenue { .. }
            | ExecutionError::Busy => ErrorClass::Permanent,
        }
    }
}

/// Mirror guard errors.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// No price satisfies the venue minimums and the protective bound.
    #[error("no valid mirror price for {symbol}: {reason}")]
    NoValidPrice {
        /// Instrument symbol.
        symbol: String,
        /// Which rule failed.
        reason: String,
    },

    /// Book has no two-sided quote to derive a mid from.
    #[error("no mid price available for {symbol}")]
    NoMidPrice {
        /// Instrument symbol.
        symbol: String,
    },

    /// Venue connector error.
    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Supervised worker errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupervisorError {
    /// Both the worker and its fallback failed.
    #[error("{label}: fallback failed after primary {primary}: {reason}")]
    FallbackFailed {
        /// Job label.
        label: String,
        /// Why the primary attempt was abandoned.
        primary: String,
        /// Why the fallback failed.
        reason: String,
    },
}

/// Balance backend errors. Never escapes the balance provider.
#[derive(Error, Debug)]
pub enum BalanceError {
    /// No credentials configured for the venue.
    #[error("no credentials for {venue}")]
    MissingCredentials {
        /// Venue id.
        venue: String,
    },

    /// Venue not registered with the backend.
    #[error("unknown venue {venue}")]
    UnknownVenue {
        /// Venue id.
        venue: String,
    },

    /// Account query failed.
    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Amounts held when a plan stops, for operator reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldAmount {
    /// Venue id.
    pub venue: String,
    /// Currency held.
    pub currency: String,
    /// Free amount at abort time.
    pub amount: Decimal,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
