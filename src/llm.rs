//! Chat-completion clients.
//!
//! [`GeminiClient`] talks to the Gemini `generateContent` endpoint. The API
//! is completion-style, so the system prompt and conversation are
//! flattened with [`render_prompt`] into a single user turn.
//!
//! Outcomes are split three ways:
//!
//! | Provider reply | Result |
//! |----------------|--------|
//! | Text candidate | `Ok(LlmResponse)` |
//! | `promptFeedback.blockReason`, safety finish, no candidates, empty text | `Ok(LlmResponse { is_blocked: true, .. })` |
//! | Transport error, non-2xx after retries, unreadable body | `Err(LlmError)` |
//!
//! Only the HTTP call is retried: a fixed number of attempts with a
//! constant delay, on 408/429/500/502/503/504 and connection failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use code_assist_core::llm::{
    render_prompt, ChatOptions, LlmClient, LlmError, LlmMessage, LlmResponse,
};

use crate::config::LlmConfig;

/// Finish reasons that mean the candidate was withheld.
const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII", "RECITATION"];

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    max_attempts: u32,
    retry_delay: Duration,
}

impl GeminiClient {
    /// Build from config, reading the key from `llm.api_key_env`.
    pub fn from_config(config: &LlmConfig, client: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self::with_api_key(config, api_key, client))
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(&self, system_prompt: &str, messages: &[LlmMessage], options: &ChatOptions) -> Value {
        let mut generation = json!({
            "temperature": options.temperature.unwrap_or(self.temperature),
            "maxOutputTokens": options.max_tokens.unwrap_or(self.max_output_tokens),
        });
        if let Some(schema) = &options.response_schema {
            generation["responseMimeType"] = json!("application/json");
            generation["responseSchema"] = schema.clone();
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": render_prompt(system_prompt, messages) }]
            }],
            "generationConfig": generation,
        })
    }

    async fn send_once(&self, body: &Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| LlmError::Deserialize(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        system_prompt: &str,
        messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(system_prompt, messages, options);

        let mut attempt = 1;
        let json = loop {
            match self.send_once(&body).await {
                Ok(json) => break json,
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        model = %self.model,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "transient LLM error, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let response = parse_gemini_response(&json, &self.model)?;
        if response.is_blocked {
            tracing::warn!(
                model = %self.model,
                reason = response.block_reason.as_deref().unwrap_or("unknown"),
                "LLM returned no usable answer"
            );
        }
        Ok(response)
    }
}

fn token_count(usage: Option<&Value>, key: &str) -> u32 {
    usage
        .and_then(|u| u.get(key))
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Decode a `generateContent` reply.
///
/// Fails only when the body is not a JSON object; every "no answer" shape
/// becomes a blocked response.
pub fn parse_gemini_response(json: &Value, model: &str) -> Result<LlmResponse, LlmError> {
    if !json.is_object() {
        return Err(LlmError::Deserialize("expected a JSON object".into()));
    }

    let usage = json.get("usageMetadata");
    let with_usage = |mut r: LlmResponse| {
        r.prompt_tokens = token_count(usage, "promptTokenCount");
        r.completion_tokens = token_count(usage, "candidatesTokenCount");
        r.total_tokens = token_count(usage, "totalTokenCount");
        r
    };

    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Ok(with_usage(LlmResponse::blocked(model, reason, None)));
    }

    let Some(candidate) = json
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return Ok(with_usage(LlmResponse::blocked(model, "NO_CANDIDATES", None)));
    };

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(reason) = finish_reason
        .as_deref()
        .filter(|r| SAFETY_FINISH_REASONS.contains(r))
    {
        return Ok(with_usage(LlmResponse::blocked(
            model,
            reason,
            finish_reason.clone(),
        )));
    }

    let content: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Ok(with_usage(LlmResponse::blocked(
            model,
            "EMPTY_RESPONSE",
            finish_reason,
        )));
    }

    Ok(with_usage(LlmResponse {
        content,
        finish_reason,
        model: model.to_string(),
        ..LlmResponse::default()
    }))
}

/// Always fails with [`LlmError::Disabled`]; callers fall back to
/// heuristics.
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn chat_completion(
        &self,
        _system_prompt: &str,
        _messages: &[LlmMessage],
        _options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Disabled)
    }
}

pub fn create_llm_client(config: &LlmConfig, client: reqwest::Client) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlmClient)),
        "gemini" => Ok(Arc::new(GeminiClient::from_config(config, client)?)),
        other => bail!("Unknown LLM provider: {}", other),
    }
}
