//! Market graph: currencies as nodes, venue conversions as directed edges.
//!
//! The graph is a multigraph holding one edge set per venue. Per-venue views feed
//! single-venue detection; [`MarketGraph::merged`] feeds cross-venue detection.

pub mod builder;
pub mod edge;

use std::collections::{BTreeMap, BTreeSet};

pub use builder::{build_graph, build_venue_edges, GraphBuild, RejectedPair};
pub use edge::MarketEdge;

/// Directed multigraph of conversion edges, grouped by venue.
#[derive(Debug, Clone, Default)]
pub struct MarketGraph {
    venues: BTreeMap<String, Vec<MarketEdge>>,
}

impl MarketGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a venue's edge set.
    pub fn insert_venue(&mut self, venue: &str, edges: Vec<MarketEdge>) {
        self.venues.insert(venue.to_string(), edges);
    }

    /// Venue ids in the graph.
    pub fn venues(&self) -> impl Iterator<Item = &str> {
        self.venues.keys().map(String::as_str)
    }

    /// Edges of one venue.
    pub fn venue_edges(&self, venue: &str) -> &[MarketEdge] {
        self.venues.get(venue).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Union of every venue's edges.
    pub fn merged(&self) -> Vec<MarketEdge> {
        self.venues.values().flatten().cloned().collect()
    }

    /// Every currency touched by an edge.
    pub fn currencies(&self) -> BTreeSet<String> {
        self.venues
            .values()
            .flatten()
            .flat_map(|e| [e.from.clone(), e.to.clone()])
            .collect()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.venues.values().map(Vec::len).sum()
    }

    /// Whether the graph has no edges.
    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }
}

/// Keep the anchor, its direct neighbours, and only the edges among them.
///
/// Every 3-hop cycle through the anchor survives this pruning.
pub fn prune_to_anchor(edges: &[MarketEdge], anchor: &str) -> Vec<MarketEdge> {
    let mut keep: BTreeSet<&str> = BTreeSet::new();
    keep.insert(anchor);
    for edge in edges {
        if edge.from == anchor {
            keep.insert(edge.to.as_str());
        }
        if edge.to == anchor {
            keep.insert(edge.from.as_str());
        }
    }

    edges
        .iter()
        .filter(|e| keep.contains(e.from.as_str()) && keep.contains(e.to.as_str()))
        .cloned()
        .collect()
}
