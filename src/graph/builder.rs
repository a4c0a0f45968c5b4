//! Snapshot → graph construction.

use serde::Serialize;
use tracing::{debug, instrument};

use super::edge::MarketEdge;
use super::MarketGraph;
use crate::error::GraphError;
use crate::venue::VenueSnapshot;

/// A pair left out of the graph, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedPair {
    /// Venue id.
    pub venue: String,
    /// Why the pair was rejected.
    pub reason: GraphError,
}

/// Output of a graph build.
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    /// The graph.
    pub graph: MarketGraph,
    /// Pairs that could not be turned into edges.
    pub rejected: Vec<RejectedPair>,
}

/// Edges for one venue's snapshot.
///
/// Each usable pair yields a sell edge (base → quote at the best bid) and a buy edge
/// (quote → base at the best ask). Pairs without metadata, inactive pairs and pairs
/// missing a book side are rejected.
#[instrument(level = "debug", skip(snapshot), fields(venue = %snapshot.venue))]
pub fn build_venue_edges(snapshot: &VenueSnapshot) -> (Vec<MarketEdge>, Vec<RejectedPair>) {
    let mut edges = Vec::with_capacity(snapshot.markets.len() * 2);
    let mut rejected = Vec::new();
    let venue = snapshot.venue.as_str();

    for market in &snapshot.markets {
        let reject = |reason: GraphError| RejectedPair {
            venue: venue.to_string(),
            reason,
        };

        if !market.active {
            rejected.push(reject(GraphError::Inactive {
                symbol: market.symbol.clone(),
            }));
            continue;
        }

        let rules = match market.rules() {
            Ok(rules) => rules,
            Err(e) => {
                rejected.push(reject(e));
                continue;
            }
        };

        let Some(book) = snapshot.books.get(&market.symbol) else {
            rejected.push(reject(GraphError::MissingBook {
                symbol: market.symbol.clone(),
            }));
            continue;
        };

        let (Some(bid), Some(ask)) = (book.top_bid(), book.top_ask()) else {
            let side = if book.top_bid().is_none() { "bid" } else { "ask" };
            rejected.push(reject(GraphError::EmptySide {
                symbol: market.symbol.clone(),
                side,
            }));
            continue;
        };

        edges.extend(MarketEdge::sell(venue, market, rules, bid));
        edges.extend(MarketEdge::buy(venue, market, rules, ask));
    }

    debug!(
        edges = edges.len(),
        rejected = rejected.len(),
        "Venue edges built"
    );

    (edges, rejected)
}

/// Build the multigraph for a set of venue snapshots.
pub fn build_graph(snapshots: &[VenueSnapshot]) -> GraphBuild {
    let mut build = GraphBuild::default();
    for snapshot in snapshots {
        let (edges, rejected) = build_venue_edges(snapshot);
        build.graph.insert_venue(&snapshot.venue, edges);
        build.rejected.extend(rejected);
    }
    build
}
