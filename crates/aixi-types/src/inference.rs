//! The inference-backend seam.
//!
//! The Ideator, the Judge and the `consultant` sub-environment all talk to a
//! language model through [`InferenceBackend`].  The production
//! implementation is an OpenAI-compatible HTTP client; tests plug in scripted
//! doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// JSON Schema the reply should conform to, sent as `response_format`.
    pub response_schema: Option<serde_json::Value>,
}

impl InferenceRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Concatenated text of every message; used for token estimation.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The reply text plus whatever token counts the backend reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Failure classes of an inference call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Unreachable, unauthorized, rate limited or server-side failure.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The prompt exceeded the model's context window.
    #[error("context overflow: {0}")]
    ContextOverflow(String),
    /// The call did not finish within its deadline.
    #[error("inference timed out after {0} ms")]
    Timeout(u64),
    /// The backend answered but the reply was unusable.
    #[error("unexpected response: {0}")]
    BadResponse(String),
}

/// Anything that can turn a chat transcript into a reply.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(&self, request: InferenceRequest) -> Result<Completion, InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role() {
        let json = serde_json::to_string(&ChatMessage::system("hello")).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn request_builder_sets_options() {
        let req = InferenceRequest::new(vec![ChatMessage::user("hi")])
            .temperature(0.3)
            .max_tokens(64);
        assert_eq!(req.temperature, Some(0.3));
        assert_eq!(req.max_tokens, Some(64));
        assert!(req.response_schema.is_none());
    }

    #[test]
    fn prompt_text_joins_messages() {
        let req = InferenceRequest::new(vec![ChatMessage::system("a"), ChatMessage::user("b")]);
        assert_eq!(req.prompt_text(), "a\nb");
    }
}
