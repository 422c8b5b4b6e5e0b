//! Cost tracking for coact runs.
//!
//! Every turn carries a [`TurnCost`]: tokens in and out, wall-clock duration,
//! and a monetary cost when the backend reports one. A [`CostTracker`] folds
//! those per category into [`CostStats`].

pub mod model;
pub mod tracker;

pub use model::{CostStats, TurnCost};
pub use tracker::CostTracker;
