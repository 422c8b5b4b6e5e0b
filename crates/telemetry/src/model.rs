//! Cost data model: per-turn cost and per-category aggregates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource usage of a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnCost {
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Wall-clock duration of the turn in milliseconds.
    pub duration_ms: u64,
    /// Monetary cost in USD, if the backend reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TurnCost {
    pub fn new(tokens_in: u64, tokens_out: u64, duration: Duration) -> Self {
        Self {
            tokens_in,
            tokens_out,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            cost_usd: None,
        }
    }

    pub fn with_cost_usd(mut self, cost_usd: Option<f64>) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Aggregated cost of every turn carrying one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_ms: u64,
    /// Sum of reported costs; turns without a reported cost add nothing.
    pub cost_usd: f64,
    /// Number of turns folded in.
    pub steps: u64,
}

impl CostStats {
    /// Fold one turn's cost into the aggregate.
    pub fn add(&mut self, cost: &TurnCost) {
        self.tokens_in += cost.tokens_in;
        self.tokens_out += cost.tokens_out;
        self.duration_ms += cost.duration_ms;
        self.cost_usd += cost.cost_usd.unwrap_or(0.0);
        self.steps += 1;
    }

    /// Combine two aggregates.
    pub fn merge(&mut self, other: &CostStats) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.duration_ms += other.duration_ms;
        self.cost_usd += other.cost_usd;
        self.steps += other.steps;
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}
