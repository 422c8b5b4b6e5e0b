//! Backend trait: the abstraction over text-generation services.
//!
//! A backend is a *stateful* collaborator: it remembers the conversation of
//! the current session on its own. The engine sends only what is new for the
//! turn and receives one structured reply.
//!
//! Implementations: OpenAI-compatible HTTP, Claude CLI sessions, scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::tool::ToolDefinition;

/// Everything the backend needs for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Zero-based turn index within the run
    pub turn: u32,

    /// The task description for the run
    pub task: String,

    /// Static guidance (catalog, tools, rules), built once per run
    pub guidance: String,

    /// The per-turn message: recommendation nudge plus prior tool results
    pub message: String,

    /// All registered tools. Never filtered by category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// JSON schema the reply must follow
    pub response_schema: serde_json::Value,
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedToolCall {
    /// Backend-assigned id, if the backend has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Resource usage reported by the backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Monetary cost, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Service-side duration, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One entry of an up-front plan: the category the agent expects to use at
/// that position, and what it intends to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    #[serde(alias = "action_type")]
    pub category: String,

    #[serde(default)]
    pub description: String,
}

impl PlannedStep {
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
        }
    }
}

/// The agent's structured reply for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Self-declared category. Free-form; need not be registered.
    pub category: String,

    /// Optional reasoning text
    #[serde(default)]
    pub thinking: String,

    /// The agent's output for this turn
    #[serde(default)]
    pub content: String,

    /// Tools the agent wants executed
    #[serde(default)]
    pub tool_calls: Vec<RequestedToolCall>,

    /// Explicit completion flag
    #[serde(default)]
    pub is_done: bool,

    #[serde(default)]
    pub usage: TurnUsage,

    /// Ordered plan, filled only in reply to a plan request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<PlannedStep>,
}

impl TurnResponse {
    /// A reply with just a category and content.
    pub fn new(category: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            thinking: String::new(),
            content: content.into(),
            tool_calls: Vec::new(),
            is_done: false,
            usage: TurnUsage::default(),
            plan: Vec::new(),
        }
    }

    pub fn done(mut self) -> Self {
        self.is_done = true;
        self
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(RequestedToolCall {
            id: None,
            name: name.into(),
            arguments,
        });
        self
    }

    pub fn with_plan(mut self, plan: Vec<PlannedStep>) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage.input_tokens = input_tokens;
        self.usage.output_tokens = output_tokens;
        self
    }
}

/// The core Backend trait.
///
/// The engine calls `respond()` once per turn without knowing which service
/// sits behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name (e.g., "openrouter", "claude-cli").
    fn name(&self) -> &str;

    /// Called once before the first turn of every run so stateful backends
    /// can start a fresh session.
    async fn begin_session(&self, _task: &str) -> Result<(), BackendError> {
        Ok(())
    }

    /// Send one turn and get the structured reply.
    async fn respond(&self, request: TurnRequest) -> Result<TurnResponse, BackendError>;
}
