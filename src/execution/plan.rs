//! Swap plans, hop records and the plan state machine.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::arbitrage::Opportunity;
use crate::error::{ErrorClass, ExecutionError, HeldAmount};
use crate::trading::Side;
use crate::venue::TradingRules;

/// Plan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    /// Created, nothing submitted.
    Planned,
    /// Placing the current hop's order.
    HopSubmitting,
    /// Waiting for the current hop's order to settle.
    HopSettling,
    /// Hop settled, moving to the next one.
    NextHop,
    /// Last hop left a dust remainder under mirror protection.
    MirrorPending,
    /// Every hop settled.
    Completed,
    /// Stopped with funds possibly held mid-cycle.
    Aborted,
}

impl PlanState {
    /// Whether the plan can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Completed | PlanState::Aborted)
    }

    /// Whether `next` is a legal successor.
    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        match (self, next) {
            (Completed | Aborted, _) => false,
            (_, Aborted) => true,
            (Planned, HopSubmitting) => true,
            (HopSubmitting, HopSubmitting | HopSettling) => true,
            (HopSettling, HopSubmitting | NextHop | MirrorPending | Completed) => true,
            (NextHop, HopSubmitting) => true,
            (MirrorPending, Completed) => true,
            _ => false,
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hop {
    /// Position in the plan.
    pub index: usize,
    /// Venue id.
    pub venue: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Currency spent.
    pub from: String,
    /// Currency received.
    pub to: String,
    /// Book price at detection time.
    pub price: Decimal,
    /// Taker fee fraction.
    pub fee_fraction: Decimal,
    /// Venue trading rules.
    pub rules: TradingRules,
    /// Amount of `from` to spend.
    pub amount_in: Decimal,
    /// Smallest acceptable amount of `to`.
    pub min_acceptable_out: Decimal,
}

impl Hop {
    /// Units of `to` per unit of `from` after fees, at the detection-time price.
    pub fn expected_rate(&self) -> Decimal {
        let gross = match self.side {
            Side::Sell => self.price,
            Side::Buy if self.price > Decimal::ZERO => Decimal::ONE / self.price,
            Side::Buy => Decimal::ZERO,
        };
        gross * (Decimal::ONE - self.fee_fraction)
    }
}

/// Per-hop execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HopStatus {
    /// Not started.
    Pending,
    /// Order placed, not settled.
    Submitted,
    /// Settled with the expected amount.
    Completed,
    /// Remainder handed to the mirror guard.
    Mirrored,
    /// Gave up on this hop.
    Failed,
}

/// What happened on one hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopRecord {
    /// Hop index.
    pub index: usize,
    /// Status.
    pub status: HopStatus,
    /// Amount of `from` the hop was sized for.
    pub amount_in: Decimal,
    /// Amount of `from` actually spent, fees included.
    pub consumed_in: Decimal,
    /// Amount of `to` received, net of fees.
    pub amount_out: Decimal,
    /// Filled base amount.
    pub filled_amount: Decimal,
    /// Fee charged.
    pub fee_paid: Decimal,
    /// `amount_out / consumed_in`.
    pub realized_rate: Decimal,
    /// Last order id.
    pub order_id: Option<String>,
    /// Orders placed for this hop.
    pub attempt_count: u32,
}

impl HopRecord {
    fn pending(index: usize) -> Self {
        Self {
            index,
            status: HopStatus::Pending,
            amount_in: Decimal::ZERO,
            consumed_in: Decimal::ZERO,
            amount_out: Decimal::ZERO,
            filled_amount: Decimal::ZERO,
            fee_paid: Decimal::ZERO,
            realized_rate: Decimal::ZERO,
            order_id: None,
            attempt_count: 0,
        }
    }

    /// Add a settled fill.
    pub fn add_fill(&mut self, consumed: Decimal, received: Decimal, filled: Decimal, fee: Decimal) {
        self.consumed_in += consumed;
        self.amount_out += received;
        self.filled_amount += filled;
        self.fee_paid += fee;
        if self.consumed_in > Decimal::ZERO {
            self.realized_rate = self.amount_out / self.consumed_in;
        }
    }
}

/// A logged state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// Previous state.
    pub from: PlanState,
    /// New state.
    pub to: PlanState,
    /// Hop being worked on.
    pub hop: Option<usize>,
    /// Free-form detail.
    pub note: Option<String>,
    /// When it happened.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Why a plan stopped early.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortReport {
    /// Failing hop.
    pub hop: usize,
    /// Error class.
    pub class: ErrorClass,
    /// Error message.
    pub error: String,
    /// Balances left on the venues touched by the plan.
    pub held: Vec<HeldAmount>,
}

/// An opportunity materialized into orders.
#[derive(Debug, Clone, Serialize)]
pub struct SwapPlan {
    /// Plan id.
    pub id: String,
    /// Currency the plan starts and ends in.
    pub start_currency: String,
    /// Steps in order.
    pub hops: Vec<Hop>,
    /// One record per hop.
    pub records: Vec<HopRecord>,
    /// Product of effective rates at detection time.
    pub expected_product: f64,
    /// Current state.
    pub state: PlanState,
    /// Every transition so far.
    pub history: Vec<Transition>,
    /// Free-form notes, e.g. a mirror order left resting.
    pub annotations: Vec<String>,
    /// Set when the plan aborted.
    pub abort: Option<AbortReport>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SwapPlan {
    /// Materialize an opportunity, propagating `initial` through the expected rates.
    pub fn from_opportunity(
        opportunity: &Opportunity,
        initial: Decimal,
        slippage_tolerance: Decimal,
    ) -> Result<Self, ExecutionError> {
        let edges = opportunity.cycle.edges();
        if edges.is_empty() {
            return Err(ExecutionError::EmptyPlan);
        }

        let mut amount = initial;
        let mut hops = Vec::with_capacity(edges.len());
        for (index, edge) in edges.iter().enumerate() {
            let mut hop = Hop {
                index,
                venue: edge.venue.clone(),
                symbol: edge.symbol.clone(),
                side: edge.side,
                from: edge.from.clone(),
                to: edge.to.clone(),
                price: edge.price,
                fee_fraction: Decimal::from_f64(edge.fee_fraction).unwrap_or(Decimal::ZERO),
                rules: edge.rules,
                amount_in: amount,
                min_acceptable_out: Decimal::ZERO,
            };
            let expected_out = amount * hop.expected_rate();
            hop.min_acceptable_out = expected_out * (Decimal::ONE - slippage_tolerance);
            amount = expected_out;
            hops.push(hop);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            start_currency: opportunity.start_currency().to_string(),
            records: (0..hops.len()).map(HopRecord::pending).collect(),
            hops,
            expected_product: opportunity.cycle.product(),
            state: PlanState::Planned,
            history: Vec::new(),
            annotations: Vec::new(),
            abort: None,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Move to `next`, logging and recording the change.
    pub fn transition(&mut self, next: PlanState, hop: Option<usize>, note: Option<String>) {
        if !self.state.can_transition_to(next) {
            warn!(plan = %self.id, from = %self.state, to = %next, "Unexpected plan transition");
        }
        info!(
            plan = %self.id,
            from = %self.state,
            to = %next,
            hop = ?hop,
            note = note.as_deref().unwrap_or(""),
            "Plan transition"
        );
        self.history.push(Transition {
            from: self.state,
            to: next,
            hop,
            note,
            at: OffsetDateTime::now_utc(),
        });
        self.state = next;
    }

    /// Number of hops.
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Amount of the start currency the plan put in.
    pub fn initial_input(&self) -> Decimal {
        self.records
            .first()
            .map(|r| r.consumed_in)
            .unwrap_or(Decimal::ZERO)
    }

    /// Product of realized hop rates.
    pub fn realized_product(&self) -> Decimal {
        self.records
            .iter()
            .map(|r| r.realized_rate)
            .fold(Decimal::ONE, |acc, rate| acc * rate)
    }

    /// Records that settled as expected.
    pub fn completed_hops(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == HopStatus::Completed)
            .count()
    }
}
