//! Rate limiting and transient-error retries at the connector boundary.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::connector::{SharedConnector, VenueConnector};
use super::types::{Balances, MarketInfo, OrderAck};
use crate::error::VenueError;
use crate::metrics;
use crate::orderbook::OrderBook;
use crate::trading::{OrderParams, OrderState};

/// Backoff policy for transient connector errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped_ms = delay_ms.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(clamped_ms)
    }

    /// Delay for a given error; rate limits honour the venue's hint.
    fn delay_for(&self, error: &VenueError, attempt: u32) -> Duration {
        match error {
            VenueError::RateLimited { retry_after_ms, .. } => {
                Duration::from_millis(*retry_after_ms).max(self.next_delay(attempt))
            }
            _ => self.next_delay(attempt),
        }
    }
}

/// Connector wrapper adding a per-venue request budget and retries.
///
/// Reads are retried on any transient error. Order placement is retried only on
/// rate limiting, where the venue is known not to have accepted the order; an
/// ambiguous timeout is left to the caller's status re-check.
pub struct RetryingConnector {
    inner: SharedConnector,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl RetryingConnector {
    /// Wrap a connector with a policy and a requests-per-second budget.
    pub fn new(inner: SharedConnector, policy: RetryPolicy, requests_per_second: u32) -> Self {
        let limiter = match NonZeroU32::new(requests_per_second) {
            Some(rate) => Some(Arc::new(DefaultDirectRateLimiter::direct(Quota::per_second(rate)))),
            None => {
                warn!(venue = %inner.venue(), "Rate limit disabled");
                None
            }
        };

        Self {
            inner,
            policy,
            limiter,
        }
    }

    /// Wrap into a shared handle.
    pub fn shared(self) -> SharedConnector {
        Arc::new(self)
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: fn(&VenueError) -> bool,
        mut call: F,
    ) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let mut attempt = 0;
        loop {
            self.throttle().await;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(&e, attempt);
                    metrics::inc_connector_retries(self.inner.venue());
                    debug!(
                        venue = %self.inner.venue(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying transient venue error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn transient(e: &VenueError) -> bool {
    e.is_transient()
}

fn rate_limited(e: &VenueError) -> bool {
    matches!(e, VenueError::RateLimited { .. })
}

#[async_trait]
impl VenueConnector for RetryingConnector {
    fn venue(&self) -> &str {
        self.inner.venue()
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, VenueError> {
        self.run("fetch_markets", transient, || self.inner.fetch_markets())
            .await
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, VenueError> {
        self.run("fetch_order_book", transient, || {
            self.inner.fetch_order_book(symbol, depth)
        })
        .await
    }

    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        self.run("fetch_balance", transient, || self.inner.fetch_balance())
            .await
    }

    async fn fetch_free_balance(&self, currency: &str) -> Result<Decimal, VenueError> {
        self.run("fetch_free_balance", transient, || {
            self.inner.fetch_free_balance(currency)
        })
        .await
    }

    async fn create_order(&self, params: &OrderParams) -> Result<OrderAck, VenueError> {
        self.run("create_order", rate_limited, || self.inner.create_order(params))
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        self.run("cancel_order", transient, || {
            self.inner.cancel_order(symbol, order_id)
        })
        .await
    }

    async fn fetch_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderState, VenueError> {
        self.run("fetch_order_status", transient, || {
            self.inner.fetch_order_status(symbol, order_id)
        })
        .await
    }

    async fn find_order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, VenueError> {
        self.run("find_order_by_client_id", transient, || {
            self.inner.find_order_by_client_id(symbol, client_order_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::mock::MockVenue;
    use rust_decimal_macros::dec;

    fn rate_limited_error() -> VenueError {
        VenueError::RateLimited {
            venue: "mock".to_string(),
            retry_after_ms: 10,
        }
    }

    #[test]
    fn backoff_is_exponential_and_clamped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_reads_are_retried() {
        let mock = Arc::new(MockVenue::new("mock"));
        mock.push_read_error(VenueError::Network("reset".to_string()));
        mock.push_read_error(rate_limited_error());

        let connector = RetryingConnector::new(mock.clone(), RetryPolicy::default(), 0);
        let markets = connector.fetch_markets().await;

        assert!(markets.is_ok());
        assert_eq!(mock.read_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_max_attempts() {
        let mock = Arc::new(MockVenue::new("mock"));
        for _ in 0..5 {
            mock.push_read_error(VenueError::Network("reset".to_string()));
        }

        let connector = RetryingConnector::new(mock.clone(), RetryPolicy::default(), 0);
        assert!(connector.fetch_balance().await.is_err());
        assert_eq!(mock.read_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let mock = Arc::new(MockVenue::new("mock"));
        mock.push_read_error(VenueError::MissingCredentials {
            venue: "mock".to_string(),
        });

        let connector = RetryingConnector::new(mock.clone(), RetryPolicy::default(), 0);
        assert!(connector.fetch_balance().await.is_err());
        assert_eq!(mock.read_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn order_placement_retries_only_rate_limits() {
        let mock = Arc::new(MockVenue::new("mock"));
        mock.push_order_error(VenueError::Timeout {
            venue: "mock".to_string(),
            operation: "create_order".to_string(),
        });

        let connector = RetryingConnector::new(mock.clone(), RetryPolicy::default(), 0);
        let params = OrderParams::sell("ETH/BTC", dec!(0.05), dec!(1));
        let err = connector.create_order(&params).await.unwrap_err();

        assert!(matches!(err, VenueError::Timeout { .. }));
        assert_eq!(mock.order_attempts(), 1);
    }
}
