//! Backend implementations for coact.
//!
//! All backends implement the `coact_core::Backend` trait. Both shipped
//! backends are text-based: they ask the model for a JSON reply matching
//! the turn's response schema and parse it with [`parse_structured_reply`].

pub mod claude_cli;
pub mod factory;
pub mod openai_compat;
pub mod reply;

pub use claude_cli::ClaudeCliBackend;
pub use factory::build_from_config;
pub use openai_compat::OpenAiCompatBackend;
pub use reply::{UNKNOWN_CATEGORY, parse_structured_reply, render_state_prompt};
