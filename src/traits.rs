//! Pluggable seams of the pipeline.
//!
//! Every outbound dependency of a source run sits behind one of these
//! traits so the orchestrator can be driven by real HTTP clients in
//! production and by in-process fakes in tests.
//!
//! ```text
//! ┌───────────┐  ┌───────────┐  ┌──────────────────┐  ┌─────────┐
//! │ Connector │  │ ChatModel │  │ WebhookTransport │  │ Sleeper │
//! │ (posts)   │  │ (LLM)     │  │ (chat webhooks)  │  │ (delay) │
//! └─────┬─────┘  └─────┬─────┘  └────────┬─────────┘  └────┬────┘
//!       └──────────────┴─────────┬───────┴─────────────────┘
//!                                ▼
//!                      ingest::Pipeline::run_source()
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ModelError;
use crate::llm::ChatMessage;
use crate::models::Batch;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A social-post provider that yields canonical [`Batch`]es.
///
/// Implementations adapt provider-specific payloads into
/// [`Item`](crate::models::Item)s. The built-in implementation is
/// [`TwitterConnector`](crate::connector_twitter::TwitterConnector).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Latest posts of one author, most recent first, capped at the
    /// configured fetch limit.
    async fn fetch_by_author(&self, handle: &str, cursor: Option<&str>) -> Result<Batch>;

    /// Search posts by keyword. `mode` is the provider query type
    /// (`"Top"` or `"Latest"`).
    async fn fetch_by_keyword(
        &self,
        query: &str,
        mode: &str,
        cursor: Option<&str>,
    ) -> Result<Batch>;
}

// ═══════════════════════════════════════════════════════════════════════
// ChatModel Trait
// ═══════════════════════════════════════════════════════════════════════

/// A chat-completion model.
///
/// One call is one attempt; timeouts and retries are applied by
/// [`llm::complete_with_retry`](crate::llm::complete_with_retry).
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier recorded in analyses and call audits.
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant text.
    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, ModelError>;
}

// ═══════════════════════════════════════════════════════════════════════
// WebhookTransport Trait
// ═══════════════════════════════════════════════════════════════════════

/// Delivers one JSON payload to one webhook URL.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `payload` to `url`, returning the HTTP status and a body
    /// preview. Non-2xx statuses are returned, not raised.
    async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<(u16, String)>;
}

// ═══════════════════════════════════════════════════════════════════════
// Sleeper Trait
// ═══════════════════════════════════════════════════════════════════════

/// Delay abstraction for retry backoff.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delay on the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
