//! Chat-model client and the retry/backoff policy around it.
//!
//! [`OpenAiChatModel`] talks to any OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint. [`complete_with_retry`]
//! wraps a single [`ChatModel`] call with a hard timeout and exponential
//! backoff.
//!
//! # Retry Strategy
//!
//! - timeout, network error, HTTP 429/5xx, empty or malformed output → retry
//! - other HTTP 4xx → fail immediately
//! - delay before attempt `n + 1` is `2^n` seconds (1s, 2s, 4s, ...)
//! - `max_retries = 2` means at most 3 attempts

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_secret, ModelConfig};
use crate::error::ModelError;
use crate::traits::{ChatModel, Sleeper};

/// Environment variable consulted when `[model] api_key` is not set.
pub const MODEL_API_KEY_ENV: &str = "PULSE_MODEL_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Render messages as one prompt string for call audits.
pub fn prompt_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]\n{}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============ OpenAI-compatible client ============

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails when no API key is configured (file or `PULSE_MODEL_API_KEY`).
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let Some(api_key) = resolve_secret(&config.api_key, MODEL_API_KEY_ENV) else {
            bail!(
                "model API key missing: set [model] api_key or {}",
                MODEL_API_KEY_ENV
            );
        };

        // The per-attempt deadline is enforced by complete_with_retry; this
        // is only a backstop for a stalled connection.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2).max(1)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.base_url),
            api_key,
            model: config.name.clone(),
            temperature: config.temperature,
        })
    }
}

/// Resolve the chat completions endpoint from the base URL.
fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let content = extract_content(&json);
        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Pull `choices[0].message.content`, or `""` when absent.
fn extract_content(json: &serde_json::Value) -> String {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

// ============ Retry ============

/// Result of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: std::result::Result<T, ModelError>,
    pub attempts: u32,
    /// Raw text of the last response received, even if it failed to parse.
    pub last_response: Option<String>,
}

/// Call `model` with a per-attempt timeout and exponential backoff.
///
/// `parse` turns the raw text into the caller's value; a parse error is
/// treated like a transient model failure and retried.
pub async fn complete_with_retry<T, F>(
    model: &dyn ChatModel,
    messages: &[ChatMessage],
    timeout: Duration,
    max_retries: u32,
    sleeper: &dyn Sleeper,
    parse: F,
) -> RetryOutcome<T>
where
    F: Fn(&str) -> std::result::Result<T, ModelError>,
{
    let mut last_err = ModelError::EmptyResponse;
    let mut last_response = None;
    let mut attempts = 0;

    for attempt in 0..=max_retries {
        attempts = attempt + 1;

        let outcome = match tokio::time::timeout(timeout, model.complete(messages)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(ModelError::EmptyResponse),
            Ok(Ok(text)) => {
                let parsed = parse(&text);
                last_response = Some(text);
                parsed
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ModelError::Timeout(timeout.as_secs())),
        };

        match outcome {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    last_response,
                }
            }
            Err(e) => {
                tracing::warn!(
                    model = model.model_name(),
                    attempt = attempts,
                    error = %e,
                    "model_call_attempt_failed"
                );
                let retryable = e.is_retryable();
                last_err = e;
                if !retryable || attempt >= max_retries {
                    break;
                }
                sleeper.sleep(Duration::from_secs(1u64 << attempt.min(5))).await;
            }
        }
    }

    RetryOutcome {
        result: Err(last_err),
        attempts,
        last_response,
    }
}
