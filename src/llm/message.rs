use std::fmt;

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged chat message.
///
/// Conversation history handed in by the caller and the prompt sequence sent
/// to a backend share this shape.  History entries may spell the role field
/// as `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "type")]
    pub role: Role,
    pub content: String,
}

/// Prior chat history supplied by the caller.
pub type ConversationMessage = ChatMessage;

/// One element of the assembled prompt.
pub type PromptMessage = ChatMessage;

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Whether more content follows an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    #[serde(rename = "")]
    Continue,
    #[serde(rename = "stop")]
    Stop,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Continue => "",
            FinishReason::Stop => "stop",
        }
    }
}

/// One item of a generation stream, serialized as
/// `{"message": "...", "finish_reason": "" | "stop"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub message: String,
    pub finish_reason: FinishReason,
}

impl GenerationEvent {
    /// Non-terminal content.
    pub fn chunk(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            finish_reason: FinishReason::Continue,
        }
    }

    /// Terminal event.
    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason == FinishReason::Stop
    }
}
