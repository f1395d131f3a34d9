//! Chat-completion abstraction.
//!
//! The [`LlmClient`] trait takes a system prompt plus an ordered message
//! list and returns an [`LlmResponse`]. A provider declining to answer
//! (safety block, empty candidate list) is a normal response with
//! [`LlmResponse::is_blocked`] set, not an error. [`LlmError`] is reserved
//! for transport failures, HTTP errors after retries, unreadable bodies,
//! and cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
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

/// Per-call generation settings. `None` means "use the client default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// JSON schema the reply must conform to. When set, the client asks
    /// the provider for JSON output.
    pub response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub finish_reason: Option<String>,
    /// The provider returned no usable answer. Check this before reading
    /// `content`.
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub model: String,
}

impl LlmResponse {
    /// A blocked response carrying no content.
    pub fn blocked(
        model: impl Into<String>,
        block_reason: impl Into<String>,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            is_blocked: true,
            block_reason: Some(block_reason.into()),
            finish_reason,
            model: model.into(),
            ..Self::default()
        }
    }

    /// Not blocked and not blank.
    pub fn is_usable(&self) -> bool {
        !self.is_blocked && !self.content.trim().is_empty()
    }
}

/// HTTP statuses worth retrying.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider is disabled")]
    Disabled,
    #[error("LLM API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("invalid LLM response: {0}")]
    Deserialize(String),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => is_transient_status(*status),
            LlmError::Transport(_) => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat_completion(
        &self,
        system_prompt: &str,
        messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError>;
}

/// Flatten a system prompt and conversation into one completion-style
/// prompt.
///
/// ```rust
/// use code_assist_core::llm::{render_prompt, LlmMessage};
///
/// let text = render_prompt("Be brief.", &[LlmMessage::user("hi")]);
/// assert_eq!(text, "Be brief.\n\nUser: hi");
/// ```
pub fn render_prompt(system_prompt: &str, messages: &[LlmMessage]) -> String {
    let mut parts = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.trim().is_empty() {
        parts.push(system_prompt.trim_end().to_string());
    }
    for m in messages {
        parts.push(format!("{}: {}", m.role.label(), m.content));
    }
    parts.join("\n\n")
}
