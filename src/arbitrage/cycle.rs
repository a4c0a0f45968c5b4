//! Closed walks of conversion edges.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::DetectionError;
use crate::graph::MarketEdge;

/// A closed walk: each edge's `to` is the next edge's `from`, and the last edge
/// returns to the first edge's `from`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    edges: Vec<MarketEdge>,
    total_weight: f64,
}

impl Cycle {
    /// Validate and build a cycle.
    pub fn new(edges: Vec<MarketEdge>) -> Result<Self, DetectionError> {
        if edges.len() < 2 {
            return Err(DetectionError::InvalidCycle(format!(
                "a cycle needs at least 2 edges, got {}",
                edges.len()
            )));
        }

        let mut seen_edges = HashSet::new();
        let mut seen_currencies = HashSet::new();
        for (i, edge) in edges.iter().enumerate() {
            let next = &edges[(i + 1) % edges.len()];
            if edge.to != next.from {
                return Err(DetectionError::InvalidCycle(format!(
                    "edge {i} ends in {} but edge {} starts from {}",
                    edge.to,
                    (i + 1) % edges.len(),
                    next.from
                )));
            }
            if !seen_edges.insert(edge.id()) {
                return Err(DetectionError::InvalidCycle(format!(
                    "edge {} used twice",
                    edge.id()
                )));
            }
            if !seen_currencies.insert(edge.from.as_str()) {
                return Err(DetectionError::InvalidCycle(format!(
                    "currency {} visited twice",
                    edge.from
                )));
            }
        }

        let total_weight = edges.iter().map(|e| e.weight).sum();
        Ok(Self {
            edges,
            total_weight,
        })
    }

    /// Edges in traversal order.
    pub fn edges(&self) -> &[MarketEdge] {
        &self.edges
    }

    /// Sum of edge weights; negative means profitable.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Number of hops.
    pub fn hop_count(&self) -> usize {
        self.edges.len()
    }

    /// Product of effective rates around the cycle.
    pub fn product(&self) -> f64 {
        (-self.total_weight).exp()
    }

    /// Gross profit in percent, before any buffer.
    pub fn gross_profit_pct(&self) -> f64 {
        (self.product() - 1.0) * 100.0
    }

    /// Currency the cycle starts and ends in.
    pub fn start_currency(&self) -> &str {
        &self.edges[0].from
    }

    /// Whether any edge touches `currency`.
    pub fn contains_currency(&self, currency: &str) -> bool {
        self.edges.iter().any(|e| e.from == currency)
    }

    /// The same cycle starting at `currency`, if it passes through it.
    pub fn rotate_to(&self, currency: &str) -> Option<Cycle> {
        let start = self.edges.iter().position(|e| e.from == currency)?;
        let mut edges = self.edges.clone();
        edges.rotate_left(start);
        Some(Cycle {
            edges,
            total_weight: self.total_weight,
        })
    }

    /// Venues the cycle trades on.
    pub fn venues(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.venue.as_str()).collect()
    }

    /// Whether every hop is on the same venue.
    pub fn is_single_venue(&self) -> bool {
        self.venues().len() == 1
    }

    /// Smallest top-of-book liquidity along the cycle.
    pub fn min_liquidity(&self) -> Decimal {
        self.edges
            .iter()
            .map(|e| e.liquidity)
            .min()
            .unwrap_or(Decimal::ZERO)
    }

    /// Rotation-independent identity.
    pub fn canonical_key(&self) -> String {
        let ids: Vec<String> = self.edges.iter().map(MarketEdge::id).collect();
        let start = ids
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let mut rotated = ids;
        rotated.rotate_left(start);
        rotated.join(">")
    }

    /// Currency path, e.g. `USDT -> BTC -> ETH -> USDT`.
    pub fn path(&self) -> String {
        let mut path: Vec<&str> = self.edges.iter().map(|e| e.from.as_str()).collect();
        path.push(self.start_currency());
        path.join(" -> ")
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} hops, {:.4}%)",
            self.path(),
            self.hop_count(),
            self.gross_profit_pct()
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::orderbook::PriceLevel;
    use crate::venue::mock::MockMarketBuilder;
    use rust_decimal::prelude::FromPrimitive;

    /// Sell edge `from -> to` with the given rate and no fee.
    pub(crate) fn edge(venue: &str, from: &str, to: &str, rate: f64) -> MarketEdge {
        let market = MockMarketBuilder::new(from, to).build();
        let rules = market.info.rules().unwrap();
        let price = Decimal::from_f64(rate).unwrap();
        MarketEdge::sell(venue, &market.info, rules, PriceLevel::new(price, Decimal::ONE_HUNDRED)).unwrap()
    }

    #[test]
    fn valid_cycle_computes_product() {
        let cycle = Cycle::new(vec![
            edge("v", "A", "B", 1.02),
            edge("v", "B", "C", 1.02),
            edge("v", "C", "A", 1.0),
        ])
        .unwrap();

        assert_eq!(cycle.hop_count(), 3);
        assert!((cycle.total_weight() + 1.0404f64.ln()).abs() < 1e-12);
        assert!((cycle.gross_profit_pct() - 4.04).abs() < 1e-9);
        assert_eq!(cycle.path(), "A -> B -> C -> A");
        assert!(cycle.is_single_venue());
    }

    #[test]
    fn broken_chains_are_rejected() {
        assert!(Cycle::new(vec![edge("v", "A", "B", 1.0)]).is_err());
        assert!(Cycle::new(vec![edge("v", "A", "B", 1.0), edge("v", "C", "A", 1.0)]).is_err());
        assert!(Cycle::new(vec![
            edge("v", "A", "B", 1.0),
            edge("v", "B", "A", 1.0),
            edge("v", "A", "B", 1.0),
            edge("v", "B", "A", 1.0),
        ])
        .is_err());
    }

    #[test]
    fn rotation_keeps_identity() {
        let cycle = Cycle::new(vec![
            edge("v", "A", "B", 1.02),
            edge("w", "B", "C", 1.02),
            edge("v", "C", "A", 1.0),
        ])
        .unwrap();

        let rotated = cycle.rotate_to("C").unwrap();
        assert_eq!(rotated.start_currency(), "C");
        assert_eq!(rotated.canonical_key(), cycle.canonical_key());
        assert!(cycle.rotate_to("Z").is_none());
        assert!(!cycle.is_single_venue());
    }
}
