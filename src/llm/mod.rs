//! Provider-agnostic language-model seam.
//!
//! The synthesis model is an external collaborator. These types decouple
//! the orchestrator from any specific SDK; an implementation handles
//! transport, retries, and vendor payloads while exposing a uniform
//! `generate` call whose `raw` field stays JSON-serializable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Tool result.
    Tool,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// A tool the model may call during synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the tool parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// A synthesis request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions available to the model.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
    /// Optional reasoning-effort hint for models that support it.
    pub reasoning_effort: Option<String>,
    /// Optional model override for this request.
    pub model: Option<String>,
}

/// A synthesis response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Raw provider payload; must be JSON-serializable.
    pub raw: serde_json::Value,
}

/// Trait for synthesis model backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"anthropic"`).
    fn name(&self) -> &'static str;

    /// Executes a generation request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on transport failures, timeouts, or malformed
    /// payloads.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError>;
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// Creates an assistant message.
#[must_use]
pub fn assistant_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = system_message("Cite every claim.");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "Cite every claim.");

        let msg = user_message("fiducial markers");
        assert_eq!(msg.role, Role::User);

        let msg = assistant_message("Markers are placed...");
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::System).unwrap();
        assert_eq!(json, "\"system\"");
        let json = serde_json::to_string(&Role::Tool).unwrap();
        assert_eq!(json, "\"tool\"");
    }

    #[test]
    fn test_raw_payload_serializable() {
        let response = GenerateResponse {
            text: "answer".to_string(),
            tool_calls: Vec::new(),
            raw: serde_json::json!({"usage": {"output_tokens": 128}}),
        };
        let round = serde_json::to_string(&response.raw).unwrap();
        assert!(round.contains("output_tokens"));
    }
}
