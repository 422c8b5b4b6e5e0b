//! Chat message types for backends that keep a session history locally.
//!
//! The engine never builds these: it sends one `TurnRequest` per turn. HTTP
//! backends whose service is stateless use a [`Conversation`] to provide the
//! session continuity the engine expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Harness-provided input (task, turn message)
    User,
    /// The agent
    Assistant,
    /// Guidance
    System,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An ordered sequence of messages with a session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_push_and_estimate() {
        let mut conv = Conversation::new();
        assert!(conv.is_empty());
        conv.push(Message::system("guide"));
        // 20 chars ≈ 5 tokens
        conv.push(Message::user("12345678901234567890"));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages[1].role, Role::User);
        assert_eq!(conv.estimated_tokens(), 6);
    }

    #[test]
    fn fresh_conversations_have_distinct_ids() {
        assert_ne!(Conversation::new().id, Conversation::new().id);
    }
}
