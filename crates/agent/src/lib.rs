//! The coact turn loop.
//!
//! Each run follows the same cycle:
//!
//! 1. **Advise**: recommend next categories from the last declared one
//! 2. **Ask**: send the turn message to the backend
//! 3. **Act**: execute every tool the agent requested
//! 4. **Record**: append a [`TraceStep`] with cost and adherence
//!
//! The loop stops when the agent reports completion, declares the done
//! category, or the turn budget runs out. Recommendations never constrain
//! the agent: any category is accepted and every tool is always offered.

pub mod advisor;
pub mod engine;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::{DEFAULT_DONE_CATEGORY, DEFAULT_REPETITION_THRESHOLD, Engine, EngineError};
pub use trace::{ExecutionContext, StopReason, ToolInvocation, ToolOutcome, TraceStep};
