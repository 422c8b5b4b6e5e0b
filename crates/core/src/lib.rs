//! # coact core
//!
//! Domain types, traits, and error definitions for the coact harness: an
//! agent labels each of its own turns with a free-form category, and the
//! harness tracks the label and suggests what might come next. Nothing here
//! ever restricts what the agent does.
//!
//! Every collaborator with more than one implementation (backends, tools)
//! is a trait in this crate; implementations live in their own crates.

pub mod backend;
pub mod category;
pub mod error;
pub mod event;
pub mod message;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, PlannedStep, RequestedToolCall, TurnRequest, TurnResponse, TurnUsage};
pub use category::{Category, CategoryRegistry, default_catalog};
pub use error::{BackendError, CategoryError, Error, Result, ToolError};
pub use event::{EventBus, RunEvent};
pub use message::{Conversation, Message, Role};
pub use tool::{FnTool, Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult};
