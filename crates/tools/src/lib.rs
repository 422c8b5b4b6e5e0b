//! Built-in tools for coact runs.
//!
//! Numeric helpers the default catalog's `compute` and `verify` categories
//! point at: arithmetic, compound growth, and descriptive statistics.
//! Tool affinity is advisory only; every registered tool is offered on
//! every turn.

pub mod calc;
pub mod compound;
pub mod stats;

use coact_core::tool::ToolRegistry;

/// Create a tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(calc::CalcTool));
    registry.register(Box::new(compound::CompoundTool));
    registry.register(Box::new(stats::StatsTool));
    registry
}
