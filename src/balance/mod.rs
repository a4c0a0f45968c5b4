//! Balance provider: how much of a currency is actually free on a venue.
//!
//! This module handles:
//! - Credential lookup per venue
//! - Balance backends (native single-asset query, full account snapshot)
//! - The fail-safe provider that tries backends in order and falls back to zero

pub mod provider;

use std::collections::HashMap;

use crate::config::Credentials;

pub use provider::{
    AccountSnapshotBackend, BalanceBackend, BalanceProvider, DirectBalanceBackend,
};

/// Credentials by venue id.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    by_venue: HashMap<String, Credentials>,
}

impl CredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read credentials for each venue from the environment. Venues without
    /// credentials are left out.
    pub fn from_env<'a>(venues: impl IntoIterator<Item = &'a str>) -> Self {
        let mut store = Self::new();
        for venue in venues {
            if let Some(credentials) = Credentials::from_env(venue) {
                store.insert(venue, credentials);
            }
        }
        store
    }

    /// Add or replace a venue's credentials.
    pub fn insert(&mut self, venue: &str, credentials: Credentials) {
        self.by_venue.insert(venue.to_string(), credentials);
    }

    /// Credentials for a venue.
    pub fn get(&self, venue: &str) -> Option<&Credentials> {
        self.by_venue.get(venue)
    }

    /// Whether a venue has credentials.
    pub fn has(&self, venue: &str) -> bool {
        self.by_venue.contains_key(venue)
    }
}
