//! Balance backends and the zero-on-failure provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use super::CredentialStore;
use crate::error::BalanceError;
use crate::venue::SharedConnector;

/// One way of asking a venue for a free balance.
#[async_trait]
pub trait BalanceBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Free amount of `currency` on `venue`.
    async fn free_balance(&self, venue: &str, currency: &str) -> Result<Decimal, BalanceError>;
}

/// Shared lookup from venue id to connector and credentials.
#[derive(Clone)]
struct Accounts {
    connectors: Arc<HashMap<String, SharedConnector>>,
    credentials: Arc<CredentialStore>,
}

impl Accounts {
    fn connector(&self, venue: &str) -> Result<&SharedConnector, BalanceError> {
        if !self.credentials.has(venue) {
            return Err(BalanceError::MissingCredentials {
                venue: venue.to_string(),
            });
        }
        self.connectors
            .get(venue)
            .ok_or_else(|| BalanceError::UnknownVenue {
                venue: venue.to_string(),
            })
    }
}

/// Uses the venue's single-asset endpoint.
#[derive(Clone)]
pub struct DirectBalanceBackend {
    accounts: Accounts,
}

impl DirectBalanceBackend {
    /// Create a backend over the given connectors.
    pub fn new(
        connectors: Arc<HashMap<String, SharedConnector>>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            accounts: Accounts {
                connectors,
                credentials,
            },
        }
    }
}

#[async_trait]
impl BalanceBackend for DirectBalanceBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn free_balance(&self, venue: &str, currency: &str) -> Result<Decimal, BalanceError> {
        let connector = self.accounts.connector(venue)?;
        Ok(connector.fetch_free_balance(currency).await?)
    }
}

/// Reads the full account snapshot and picks the currency out of it.
#[derive(Clone)]
pub struct AccountSnapshotBackend {
    accounts: Accounts,
}

impl AccountSnapshotBackend {
    /// Create a backend over the given connectors.
    pub fn new(
        connectors: Arc<HashMap<String, SharedConnector>>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            accounts: Accounts {
                connectors,
                credentials,
            },
        }
    }
}

#[async_trait]
impl BalanceBackend for AccountSnapshotBackend {
    fn name(&self) -> &'static str {
        "account_snapshot"
    }

    async fn free_balance(&self, venue: &str, currency: &str) -> Result<Decimal, BalanceError> {
        let connector = self.accounts.connector(venue)?;
        Ok(connector.fetch_balance().await?.free(currency))
    }
}

/// Answers "how much is free" without ever failing.
///
/// Backends are tried in order. If every backend fails the answer is zero; nothing
/// is cached or estimated, and negative figures are clamped to zero.
#[derive(Clone)]
pub struct BalanceProvider {
    backends: Vec<Arc<dyn BalanceBackend>>,
}

impl BalanceProvider {
    /// Provider over explicit backends.
    pub fn new(backends: Vec<Arc<dyn BalanceBackend>>) -> Self {
        Self { backends }
    }

    /// Direct query first, account snapshot second.
    pub fn standard(
        connectors: Arc<HashMap<String, SharedConnector>>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self::new(vec![
            Arc::new(DirectBalanceBackend::new(connectors.clone(), credentials.clone())),
            Arc::new(AccountSnapshotBackend::new(connectors, credentials)),
        ])
    }

    /// Free amount of `currency` on `venue`, or zero.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_free_balance(&self, venue: &str, currency: &str) -> Decimal {
        for backend in &self.backends {
            match backend.free_balance(venue, currency).await {
                Ok(amount) => {
                    debug!(backend = backend.name(), amount = %amount, "Free balance");
                    return amount.max(Decimal::ZERO);
                }
                Err(BalanceError::MissingCredentials { .. }) => {
                    debug!(backend = backend.name(), "No credentials, skipping backend");
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Balance backend failed");
                }
            }
        }
        Decimal::ZERO
    }
}

impl std::fmt::Debug for BalanceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BalanceProvider")
            .field("backends", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::VenueError;
    use crate::venue::mock::{MockConfig, MockVenue};
    use rust_decimal_macros::dec;

    fn provider(mock: MockVenue, with_credentials: bool) -> BalanceProvider {
        let mut connectors: HashMap<String, SharedConnector> = HashMap::new();
        connectors.insert("mock".to_string(), Arc::new(mock));
        let mut credentials = CredentialStore::new();
        if with_credentials {
            credentials.insert("mock", Credentials::paper());
        }
        BalanceProvider::standard(Arc::new(connectors), Arc::new(credentials))
    }

    #[tokio::test]
    async fn reads_free_balance() {
        let mock = MockVenue::new("mock");
        mock.set_balance("BTC", dec!(1.5));

        let balances = provider(mock, true);
        assert_eq!(balances.get_free_balance("mock", "BTC").await, dec!(1.5));
        assert_eq!(balances.get_free_balance("mock", "ETH").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn zero_without_credentials() {
        let mock = MockVenue::new("mock");
        mock.set_balance("BTC", dec!(1.5));

        let balances = provider(mock, false);
        assert_eq!(balances.get_free_balance("mock", "BTC").await, Decimal::ZERO);
        assert_eq!(balances.get_free_balance("other", "BTC").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn falls_back_to_account_snapshot() {
        let mock = MockVenue::with_config(
            "mock",
            MockConfig {
                fail_free_balance: true,
                ..MockConfig::default()
            },
        );
        mock.set_balance("BTC", dec!(2));

        let balances = provider(mock, true);
        assert_eq!(balances.get_free_balance("mock", "BTC").await, dec!(2));
    }

    #[tokio::test]
    async fn zero_when_every_backend_fails() {
        let mock = MockVenue::with_config(
            "mock",
            MockConfig {
                fail_free_balance: true,
                fail_balance: true,
                ..MockConfig::default()
            },
        );
        mock.set_balance("BTC", dec!(2));
        mock.push_read_error(VenueError::Network("reset".to_string()));

        let balances = provider(mock, true);
        assert_eq!(balances.get_free_balance("mock", "BTC").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_balances_clamp_to_zero() {
        let mock = MockVenue::new("mock");
        mock.set_balance("BTC", dec!(-0.1));

        let balances = provider(mock, true);
        assert_eq!(balances.get_free_balance("mock", "BTC").await, Decimal::ZERO);
    }
}
