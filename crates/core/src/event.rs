//! Run lifecycle events.
//!
//! The engine publishes an event whenever a run starts, a turn or tool call
//! completes, or a run ends. Observers (progress printers, exporters) subscribe
//! without touching the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// A run began
    RunStarted {
        run_id: String,
        task_preview: String,
        max_turns: u32,
        timestamp: DateTime<Utc>,
    },

    /// The agent produced its up-front plan
    PlanGenerated {
        run_id: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn was recorded in the trace
    TurnCompleted {
        run_id: String,
        turn: u32,
        category: String,
        followed: bool,
        tokens_used: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        run_id: String,
        turn: u32,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The run reached its terminal state
    RunFinished {
        run_id: String,
        steps: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The backend failed and the run was aborted
    RunFailed {
        run_id: String,
        last_turn: Option<u32>,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for run events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RunEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
