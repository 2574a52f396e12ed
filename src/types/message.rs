//! Chat messages and roles.

use serde::{Deserialize, Serialize};

use crate::errors::StreamResult;

/// Message role.
///
/// `Custom` keeps roles this crate does not know about so they can be
/// forwarded to providers that accept free-form roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool result.
    Tool,
    /// Any other role name.
    Custom(String),
}

impl Role {
    /// Parses a wire role name. The legacy `function` role maps to
    /// [`Role::Tool`]; unknown names become [`Role::Custom`].
    pub fn from_wire(name: &str) -> Self {
        match name {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" | "function" => Role::Tool,
            other => Role::Custom(other.to_string()),
        }
    }

    /// Returns the canonical role name.
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Role::from_wire(&name)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Maps a [`Role`] to the name a provider expects on the wire.
///
/// Implementations must cover every role and fail with
/// [`StreamError::Validation`](crate::StreamError::Validation) for roles the
/// provider cannot represent.
pub trait RoleMapper {
    /// Returns the wire role name.
    fn map_role(&self, role: &Role) -> StreamResult<String>;
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
