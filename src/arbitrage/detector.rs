//! Negative-cycle detection over log-weighted edges.
//!
//! Bellman-Ford from a virtual source connected to every currency at distance zero,
//! so every negative cycle in the graph is reachable. Cycles are recovered by walking
//! predecessor edges from any node that still relaxes after `|V| - 1` rounds.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, trace};

use super::cycle::Cycle;
use crate::error::DetectionError;
use crate::graph::{prune_to_anchor, MarketEdge};

/// Floating-point slack when deciding whether an edge relaxes.
const RELAX_TOLERANCE: f64 = 1e-12;

/// Hop count of a triangular cycle.
const TRIANGLE_HOPS: usize = 3;

/// Detector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// A cycle is reported only if its total weight is below `-epsilon`.
    pub epsilon: f64,
    /// When set, only 3-hop cycles through this currency are reported.
    pub triangular_anchor: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            triangular_anchor: None,
        }
    }
}

/// Finds profitable cycles in an edge set.
#[derive(Debug, Clone, Default)]
pub struct CycleDetector {
    config: DetectorConfig,
}

impl CycleDetector {
    /// Create a detector.
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Detector configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Every distinct negative cycle found, most profitable first.
    ///
    /// `cancel` is checked between relaxation rounds; a set flag aborts the run with
    /// [`DetectionError::Cancelled`].
    #[instrument(level = "debug", skip_all, fields(edges = edges.len()))]
    pub fn detect_all(
        &self,
        edges: &[MarketEdge],
        cancel: &AtomicBool,
    ) -> Result<Vec<Cycle>, DetectionError> {
        let pruned;
        let edges = match &self.config.triangular_anchor {
            Some(anchor) => {
                pruned = prune_to_anchor(edges, anchor);
                pruned.as_slice()
            }
            None => edges,
        };

        let mut index: BTreeMap<&str, usize> = BTreeMap::new();
        for edge in edges {
            let next = index.len();
            index.entry(edge.from.as_str()).or_insert(next);
            let next = index.len();
            index.entry(edge.to.as_str()).or_insert(next);
        }
        let nodes = index.len();
        if nodes < 2 {
            return Ok(Vec::new());
        }

        let links: Vec<(usize, usize, f64)> = edges
            .iter()
            .map(|e| (index[e.from.as_str()], index[e.to.as_str()], e.weight))
            .collect();

        let mut dist = vec![0.0f64; nodes];
        let mut pred: Vec<Option<usize>> = vec![None; nodes];

        let mut settled = false;
        for round in 0..nodes - 1 {
            if cancel.load(Ordering::Relaxed) {
                return Err(DetectionError::Cancelled);
            }
            let mut changed = false;
            for (i, &(u, v, w)) in links.iter().enumerate() {
                if dist[u] + w < dist[v] - RELAX_TOLERANCE {
                    dist[v] = dist[u] + w;
                    pred[v] = Some(i);
                    changed = true;
                }
            }
            if !changed {
                trace!(round, "Relaxation converged");
                settled = true;
                break;
            }
        }
        if settled {
            return Ok(Vec::new());
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(DetectionError::Cancelled);
        }

        let mut relaxed = Vec::new();
        for (i, &(u, v, w)) in links.iter().enumerate() {
            if dist[u] + w < dist[v] - RELAX_TOLERANCE {
                dist[v] = dist[u] + w;
                pred[v] = Some(i);
                relaxed.push(v);
            }
        }

        let mut seen_keys = HashSet::new();
        let mut cycles = Vec::new();
        for start in relaxed {
            let Some(edge_ids) = walk_predecessors(start, &pred, &links) else {
                continue;
            };
            let cycle_edges = edge_ids.into_iter().map(|i| edges[i].clone()).collect();
            let cycle = match Cycle::new(cycle_edges) {
                Ok(cycle) => cycle,
                Err(e) => {
                    debug!(error = %e, "Discarding malformed predecessor walk");
                    continue;
                }
            };
            if cycle.total_weight() >= -self.config.epsilon {
                continue;
            }
            let Some(cycle) = self.admit(cycle) else {
                continue;
            };
            if seen_keys.insert(cycle.canonical_key()) {
                cycles.push(cycle);
            }
        }

        cycles.sort_by(|a, b| {
            a.total_weight()
                .total_cmp(&b.total_weight())
                .then_with(|| a.canonical_key().cmp(&b.canonical_key()))
        });

        debug!(found = cycles.len(), "Detection finished");
        Ok(cycles)
    }

    /// The most profitable cycle, if any.
    pub fn detect(
        &self,
        edges: &[MarketEdge],
        cancel: &AtomicBool,
    ) -> Result<Option<Cycle>, DetectionError> {
        Ok(self.detect_all(edges, cancel)?.into_iter().next())
    }

    /// Apply the triangular restriction, rotating accepted cycles to the anchor.
    fn admit(&self, cycle: Cycle) -> Option<Cycle> {
        match &self.config.triangular_anchor {
            Some(anchor) if cycle.hop_count() == TRIANGLE_HOPS => cycle.rotate_to(anchor),
            Some(_) => None,
            None => Some(cycle),
        }
    }
}

/// Follow predecessors from `start` until a node repeats; return the loop's edge
/// indices in traversal order.
fn walk_predecessors(
    start: usize,
    pred: &[Option<usize>],
    links: &[(usize, usize, f64)],
) -> Option<Vec<usize>> {
    let mut position: Vec<Option<usize>> = vec![None; pred.len()];
    let mut walked: Vec<usize> = Vec::new();
    let mut node = start;

    loop {
        if let Some(first) = position[node] {
            let mut cycle = walked.split_off(first);
            cycle.reverse();
            return Some(cycle);
        }
        position[node] = Some(walked.len());
        let edge = pred[node]?;
        walked.push(edge);
        node = links[edge].0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::cycle::tests::edge;

    fn detector() -> CycleDetector {
        CycleDetector::default()
    }

    fn never() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn finds_profitable_triangle() {
        let edges = vec![
            edge("v", "A", "B", 1.02),
            edge("v", "B", "C", 1.02),
            edge("v", "C", "A", 1.0),
        ];

        let cycle = detector().detect(&edges, &never()).unwrap().unwrap();
        assert_eq!(cycle.hop_count(), 3);
        assert!((cycle.total_weight() + 1.0404f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn break_even_cycle_is_not_reported() {
        let edges = vec![
            edge("v", "A", "B", 2.0),
            edge("v", "B", "C", 0.5),
            edge("v", "C", "A", 1.0),
        ];

        assert!(detector().detect_all(&edges, &never()).unwrap().is_empty());
    }

    #[test]
    fn losing_graph_has_no_cycles() {
        let edges = vec![
            edge("v", "A", "B", 0.99),
            edge("v", "B", "A", 1.0),
            edge("v", "B", "C", 1.0),
            edge("v", "C", "A", 0.99),
        ];

        assert!(detector().detect_all(&edges, &never()).unwrap().is_empty());
    }

    #[test]
    fn every_reported_cycle_is_closed_and_negative() {
        let edges = vec![
            edge("v", "A", "B", 1.05),
            edge("v", "B", "A", 0.96),
            edge("v", "B", "C", 1.0),
            edge("v", "C", "D", 1.0),
            edge("v", "D", "B", 1.03),
        ];

        let cycles = detector().detect_all(&edges, &never()).unwrap();
        assert!(!cycles.is_empty());
        for cycle in &cycles {
            assert!(cycle.total_weight() < -1e-9);
            let first = &cycle.edges()[0];
            let last = &cycle.edges()[cycle.hop_count() - 1];
            assert_eq!(last.to, first.from);
        }
        let keys: HashSet<String> = cycles.iter().map(Cycle::canonical_key).collect();
        assert_eq!(keys.len(), cycles.len());
    }

    #[test]
    fn triangular_mode_rotates_to_anchor() {
        let detector = CycleDetector::new(DetectorConfig {
            epsilon: 1e-9,
            triangular_anchor: Some("USDT".to_string()),
        });
        let edges = vec![
            edge("v", "BTC", "ETH", 1.01),
            edge("v", "ETH", "USDT", 1.01),
            edge("v", "USDT", "BTC", 1.0),
            edge("v", "XMR", "BTC", 5.0),
            edge("v", "BTC", "XMR", 5.0),
        ];

        let cycles = detector.detect_all(&edges, &never()).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].start_currency(), "USDT");
        assert_eq!(cycles[0].path(), "USDT -> BTC -> ETH -> USDT");
    }

    #[test]
    fn triangular_mode_ignores_cycles_off_anchor() {
        let detector = CycleDetector::new(DetectorConfig {
            epsilon: 1e-9,
            triangular_anchor: Some("USDT".to_string()),
        });
        let edges = vec![
            edge("v", "A", "B", 1.1),
            edge("v", "B", "C", 1.1),
            edge("v", "C", "A", 1.1),
        ];

        assert!(detector.detect_all(&edges, &never()).unwrap().is_empty());
    }

    #[test]
    fn cancellation_aborts_detection() {
        let edges = vec![
            edge("v", "A", "B", 1.02),
            edge("v", "B", "C", 1.02),
            edge("v", "C", "A", 1.0),
        ];

        let cancel = AtomicBool::new(true);
        assert!(matches!(
            detector().detect_all(&edges, &cancel),
            Err(DetectionError::Cancelled)
        ));
    }

    #[test]
    fn epsilon_filters_marginal_cycles() {
        let detector = CycleDetector::new(DetectorConfig {
            epsilon: 0.01,
            triangular_anchor: None,
        });
        let edges = vec![
            edge("v", "A", "B", 1.001),
            edge("v", "B", "C", 1.0),
            edge("v", "C", "A", 1.0),
        ];

        assert!(detector.detect_all(&edges, &never()).unwrap().is_empty());
    }
}
