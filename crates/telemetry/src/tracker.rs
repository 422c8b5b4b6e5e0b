//! Per-category cost accumulation.

use std::collections::BTreeMap;

use crate::model::{CostStats, TurnCost};

/// Accumulates [`TurnCost`]s keyed by category.
///
/// Categories are arbitrary strings; the tracker neither knows nor cares
/// whether they are registered anywhere. Keys iterate in sorted order.
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    stats: BTreeMap<String, CostStats>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one turn's cost under a category.
    pub fn record(&mut self, category: &str, cost: &TurnCost) {
        self.stats.entry(category.to_string()).or_default().add(cost);
        tracing::trace!(
            category,
            tokens_in = cost.tokens_in,
            tokens_out = cost.tokens_out,
            duration_ms = cost.duration_ms,
            "Recorded turn cost"
        );
    }

    /// Aggregate for a single category.
    pub fn get(&self, category: &str) -> Option<&CostStats> {
        self.stats.get(category)
    }

    pub fn stats(&self) -> &BTreeMap<String, CostStats> {
        &self.stats
    }

    pub fn into_stats(self) -> BTreeMap<String, CostStats> {
        self.stats
    }

    /// Aggregate across every category.
    pub fn total(&self) -> CostStats {
        let mut total = CostStats::default();
        for stats in self.stats.values() {
            total.merge(stats);
        }
        total
    }
}

impl<'a> FromIterator<(&'a str, &'a TurnCost)> for CostTracker {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a TurnCost)>>(iter: I) -> Self {
        let mut tracker = Self::new();
        for (category, cost) in iter {
            tracker.record(category, cost);
        }
        tracker
    }
}
