//! Opportunity filtering and ranking.

use std::cmp::Ordering;
use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::blacklist::Blacklist;
use super::cycle::Cycle;

/// Filter and ranker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Minimum top-of-book liquidity per edge, in `from` units.
    pub min_edge_liquidity: Decimal,
    /// Minimum net profit, in percent.
    pub min_profit_pct: Decimal,
    /// Minimum absolute profit on `trade_notional`.
    pub min_profit_abs: Decimal,
    /// Start-currency amount used to estimate absolute profit.
    pub trade_notional: Decimal,
    /// Buffer subtracted per hop, in percent.
    pub fee_slippage_buffer_pct: Decimal,
    /// Cycles must pass through this currency and start there.
    pub anchor: Option<String>,
    /// Opportunities kept after ranking.
    pub top_n: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_edge_liquidity: Decimal::ZERO,
            min_profit_pct: Decimal::new(1, 1),
            min_profit_abs: Decimal::ZERO,
            trade_notional: Decimal::ONE_HUNDRED,
            fee_slippage_buffer_pct: Decimal::new(2, 2),
            anchor: None,
            top_n: 5,
        }
    }
}

/// A cycle that passed every filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    /// The cycle, rotated to the anchor when one is configured.
    pub cycle: Cycle,
    /// Profit implied by edge weights, in percent.
    pub gross_pct: Decimal,
    /// Gross profit minus the per-hop buffer, in percent.
    pub net_pct: Decimal,
    /// Net profit on `trade_notional`, in start currency units.
    pub est_profit_abs: Decimal,
    /// Smallest edge liquidity on the cycle.
    pub min_liquidity: Decimal,
    /// Rotation-independent cycle identity.
    pub key: String,
}

impl Opportunity {
    /// Currency the plan starts from.
    pub fn start_currency(&self) -> &str {
        self.cycle.start_currency()
    }
}

/// Why cycles were dropped, per filter stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    /// Cycles examined.
    pub examined: usize,
    /// Dropped for a blacklisted pair.
    pub blacklisted: usize,
    /// Dropped for thin liquidity or venue minimums.
    pub illiquid: usize,
    /// Dropped for insufficient net profit.
    pub unprofitable: usize,
    /// Dropped for not touching the anchor.
    pub off_anchor: usize,
    /// Survived and ranked.
    pub accepted: usize,
}

/// Applies the filter chain and ranks the survivors.
#[derive(Debug, Clone)]
pub struct OpportunityFilter {
    config: FilterConfig,
    blacklist: Arc<Blacklist>,
}

impl OpportunityFilter {
    /// Create a filter over a shared blacklist.
    pub fn new(config: FilterConfig, blacklist: Arc<Blacklist>) -> Self {
        Self { config, blacklist }
    }

    /// Filter settings.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter, rank and truncate to `top_n`.
    pub fn filter_and_rank(&self, cycles: Vec<Cycle>) -> Vec<Opportunity> {
        self.filter_with_report(cycles).0
    }

    /// Like [`filter_and_rank`](Self::filter_and_rank), with per-stage drop counts.
    #[instrument(level = "debug", skip_all, fields(cycles = cycles.len()))]
    pub fn filter_with_report(&self, cycles: Vec<Cycle>) -> (Vec<Opportunity>, FilterReport) {
        let mut report = FilterReport {
            examined: cycles.len(),
            ..FilterReport::default()
        };
        let mut accepted = Vec::new();

        for cycle in cycles {
            if let Some(edge) = cycle
                .edges()
                .iter()
                .find(|e| self.blacklist.contains(&e.venue, &e.symbol))
            {
                debug!(cycle = %cycle, edge = %edge, "Dropping cycle through blacklisted pair");
                report.blacklisted += 1;
                continue;
            }

            if !self.is_liquid(&cycle) {
                report.illiquid += 1;
                continue;
            }

            let Some((gross_pct, net_pct, est_profit_abs)) = self.profit(&cycle) else {
                report.unprofitable += 1;
                continue;
            };

            let cycle = match &self.config.anchor {
                Some(anchor) => match cycle.rotate_to(anchor) {
                    Some(rotated) => rotated,
                    None => {
                        report.off_anchor += 1;
                        continue;
                    }
                },
                None => cycle,
            };

            accepted.push(Opportunity {
                min_liquidity: cycle.min_liquidity(),
                key: cycle.canonical_key(),
                cycle,
                gross_pct,
                net_pct,
                est_profit_abs,
            });
        }

        accepted.sort_by(rank);
        accepted.truncate(self.config.top_n);
        report.accepted = accepted.len();

        if let Some(best) = accepted.first() {
            info!(
                path = %best.cycle.path(),
                net_pct = %best.net_pct.round_dp(4),
                est_profit = %best.est_profit_abs.round_dp(8),
                accepted = report.accepted,
                "Arbitrage opportunity ranked"
            );
        } else {
            debug!(?report, "No opportunity survived filtering");
        }

        (accepted, report)
    }

    fn is_liquid(&self, cycle: &Cycle) -> bool {
        cycle.edges().iter().all(|e| {
            let ok = e.liquidity >= self.config.min_edge_liquidity && e.meets_venue_minimums();
            if !ok {
                debug!(edge = %e, liquidity = %e.liquidity, "Edge below liquidity or venue minimum");
            }
            ok
        })
    }

    /// `(gross %, net %, absolute profit)` when both thresholds are met.
    fn profit(&self, cycle: &Cycle) -> Option<(Decimal, Decimal, Decimal)> {
        let gross_pct = Decimal::from_f64(cycle.gross_profit_pct())?;
        let hops = Decimal::from(cycle.hop_count());
        let net_pct = gross_pct - self.config.fee_slippage_buffer_pct * hops;
        let est_profit_abs = self.config.trade_notional * net_pct / Decimal::ONE_HUNDRED;

        if net_pct < self.config.min_profit_pct || est_profit_abs < self.config.min_profit_abs {
            debug!(
                cycle = %cycle,
                net_pct = %net_pct,
                est_profit = %est_profit_abs,
                "Cycle below profit thresholds"
            );
            return None;
        }
        if net_pct <= Decimal::ZERO {
            return None;
        }
        Some((gross_pct, net_pct, est_profit_abs))
    }
}

/// Net profit desc, fewer hops, deeper liquidity, then key.
fn rank(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.net_pct
        .cmp(&a.net_pct)
        .then_with(|| a.cycle.hop_count().cmp(&b.cycle.hop_count()))
        .then_with(|| b.min_liquidity.cmp(&a.min_liquidity))
        .then_with(|| a.key.cmp(&b.key))
}
