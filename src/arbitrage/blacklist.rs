//! Venue/pair exclusion list.
//!
//! Entries come from configuration at startup and from compliance rejections at
//! runtime. The list only grows; every write goes through [`Blacklist::append`].

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Venue id matching every venue.
pub const ANY_VENUE: &str = "*";

/// An excluded `(venue, pair)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Venue id, or `*`.
    pub venue: String,
    /// Normalized pair (`BASE/QUOTE`).
    pub pair: String,
    /// Why the pair is excluded.
    pub reason: String,
}

impl BlacklistEntry {
    /// Create an entry, normalizing venue and pair.
    pub fn new(venue: &str, pair: &str, reason: impl Into<String>) -> Self {
        Self {
            venue: venue.trim().to_lowercase(),
            pair: normalize_pair(pair),
            reason: reason.into(),
        }
    }

    /// Parse `venue:pair[:reason]`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut parts = raw.splitn(3, ':');
        let venue = parts.next().unwrap_or("").trim();
        let pair = parts.next().unwrap_or("").trim();
        let reason = parts.next().map(str::trim).unwrap_or("configured");

        if venue.is_empty() || pair.is_empty() {
            return Err(format!(
                "blacklist entry '{raw}' must look like venue:pair:reason"
            ));
        }
        Ok(Self::new(venue, pair, reason))
    }
}

/// Uppercase a pair and use `/` as the separator.
pub fn normalize_pair(pair: &str) -> String {
    pair.trim().to_uppercase().replace(['-', '_'], "/")
}

/// Shared, append-only exclusion list.
#[derive(Debug, Default)]
pub struct Blacklist {
    entries: RwLock<HashMap<(String, String), BlacklistEntry>>,
    journal: Option<PathBuf>,
}

impl Blacklist {
    /// Create a list from initial entries.
    pub fn new(entries: impl IntoIterator<Item = BlacklistEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| ((e.venue.clone(), e.pair.clone()), e))
            .collect();
        Self {
            entries: RwLock::new(entries),
            journal: None,
        }
    }

    /// Persist appends to a JSON-lines file, loading entries it already holds.
    pub fn with_journal(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        match read_journal(&path) {
            Ok(restored) => {
                let mut entries = self.entries.write();
                let count = restored.len();
                for entry in restored {
                    entries.insert((entry.venue.clone(), entry.pair.clone()), entry);
                }
                if count > 0 {
                    info!(path = %path.display(), count, "Restored blacklist journal");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read blacklist journal"),
        }
        self.journal = Some(path);
        self
    }

    /// Whether `pair` is excluded on `venue`.
    pub fn contains(&self, venue: &str, pair: &str) -> bool {
        self.reason(venue, pair).is_some()
    }

    /// Exclusion reason for `pair` on `venue`.
    pub fn reason(&self, venue: &str, pair: &str) -> Option<String> {
        let venue = venue.to_lowercase();
        let pair = normalize_pair(pair);
        let entries = self.entries.read();
        entries
            .get(&(venue, pair.clone()))
            .or_else(|| entries.get(&(ANY_VENUE.to_string(), pair)))
            .map(|e| e.reason.clone())
    }

    /// Add an entry. Returns `false` if the pair was already excluded on that venue.
    pub fn append(&self, entry: BlacklistEntry) -> bool {
        let mut entries = self.entries.write();
        let key = (entry.venue.clone(), entry.pair.clone());
        if entries.contains_key(&key) {
            return false;
        }

        warn!(
            venue = %entry.venue,
            pair = %entry.pair,
            reason = %entry.reason,
            "Blacklisting pair"
        );
        if let Some(path) = &self.journal {
            if let Err(e) = append_journal(path, &entry) {
                warn!(path = %path.display(), error = %e, "Failed to write blacklist journal");
            }
        }
        entries.insert(key, entry);
        true
    }

    /// Snapshot of all entries, sorted by venue then pair.
    pub fn entries(&self) -> Vec<BlacklistEntry> {
        let mut all: Vec<BlacklistEntry> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| (&a.venue, &a.pair).cmp(&(&b.venue, &b.pair)));
        all
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn append_journal(path: &Path, entry: &BlacklistEntry) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")
}

fn read_journal(path: &Path) -> std::io::Result<Vec<BlacklistEntry>> {
    let file = std::fs::File::open(path)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(error = %e, "Skipping malformed blacklist journal line"),
        }
    }
    Ok(entries)
}
