//! Model Backend Abstraction Layer
//!
//! This module defines the conversation data model shared by every part of the
//! research loop and the `LLMProvider` trait that model backends implement.
//! A provider receives the whole conversation plus the schemas of the tools
//! bound to the run, and returns exactly one assistant message which may carry
//! tool calls and token usage.
//!
//! Roles form a closed set. Constructors are the only way the engine builds
//! messages, so a conversation is structurally valid by construction: tool
//! calls only appear on assistant messages and call ids only on tool results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// True when the request can never succeed because it does not fit the
    /// model's context window. Retrying such a request is futile.
    pub fn is_context_length(&self) -> bool {
        matches!(self, LLMError::ContextLengthExceeded(_))
    }
}

/// Returns true when a backend error body reports a context-window overflow
pub fn mentions_context_length(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("context length")
        || lowered.contains("context_length")
        || lowered.contains("maximum context")
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,

    /// The asker; serialized as `user` on the wire
    #[serde(rename = "user")]
    Human,

    Assistant,

    /// Result of one tool call
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::Human => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Token accounting attached to an assistant message
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Tool call request from the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Backend-assigned identifier. Calls synthesized by the engine have none.
    pub id: Option<String>,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool call with no backend id
    pub fn anonymous(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,

    pub content: String,

    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Originating call id of a tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool that produced a tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            usage: None,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a new human message
    pub fn human(content: impl Into<String>) -> Self {
        Self::plain(Role::Human, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create a new tool result message
    pub fn tool_result(
        content: impl Into<String>,
        tool_call_id: Option<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id,
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Attach tool calls. Ignored for non-assistant messages.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        if self.role == Role::Assistant {
            self.tool_calls = tool_calls;
        }
        self
    }

    /// Attach token usage
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }

    /// Total tokens reported for this message, 0 when the backend sent none
    pub fn total_tokens(&self) -> u64 {
        self.usage.map(|u| u.total_tokens).unwrap_or(0)
    }
}

/// Description of a tool offered to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,

    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Model backend trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai")
    fn name(&self) -> &str;

    /// Returns the model identifier requests are sent for
    fn model(&self) -> &str;

    /// Generate the next assistant message
    ///
    /// # Arguments
    /// * `messages` - Full conversation, system prompt first
    /// * `tools` - Schemas of the tools the model may call; empty disables tool use
    ///
    /// # Returns
    /// * `Ok(Message)` - One assistant message
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let human = Message::human("Hello");
        assert_eq!(human.role, Role::Human);
        assert_eq!(human.content, "Hello");
        assert_eq!(human.tool_call_id, None);

        let system = Message::system("You are a research assistant");
        assert_eq!(system.role, Role::System);

        let tool = Message::tool_result("result", Some("call_123".to_string()), "search");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id, Some("call_123".to_string()));
        assert_eq!(tool.tool_name.as_deref(), Some("search"));
        assert!(tool.is_tool_result());
    }

    #[test]
    fn test_tool_calls_only_attach_to_assistant() {
        let call = ToolCall::new("c1", "search", json!({"query": ["rust"]}));

        let assistant = Message::assistant("").with_tool_calls(vec![call.clone()]);
        assert!(assistant.has_tool_calls());

        let human = Message::human("hi").with_tool_calls(vec![call]);
        assert!(!human.has_tool_calls());
    }

    #[test]
    fn test_total_tokens_defaults_to_zero() {
        let msg = Message::assistant("answer");
        assert_eq!(msg.total_tokens(), 0);

        let msg = msg.with_usage(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        assert_eq!(msg.total_tokens(), 15);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(Role::Human.to_string(), "user");
        assert_eq!(serde_json::to_value(Role::Human).unwrap(), json!("user"));
        assert_eq!(serde_json::to_value(Role::Tool).unwrap(), json!("tool"));
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let msg = Message::human("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("usage"));

        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_context_length_detection() {
        assert!(mentions_context_length(
            "This model's maximum context length is 8192 tokens"
        ));
        assert!(mentions_context_length(
            r#"{"error":{"code":"context_length_exceeded"}}"#
        ));
        assert!(!mentions_context_length("invalid api key"));

        assert!(LLMError::ContextLengthExceeded("x".to_string()).is_context_length());
        assert!(!LLMError::Timeout.is_context_length());
    }
}
