//! Typed errors for the outbound HTTP clients.
//!
//! Orchestration code works with `anyhow`; these enums exist where callers
//! need to branch on the failure kind (retry or not, which status code).

use thiserror::Error;

/// Errors from the upstream social-post provider.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Parse(err.to_string())
    }
}

/// Errors from a chat-model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model_empty_response")]
    EmptyResponse,

    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Whether another attempt may succeed. Client errors other than 429 are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ModelError::Timeout(30).is_retryable());
        assert!(ModelError::EmptyResponse.is_retryable());
        assert!(ModelError::Malformed("x".into()).is_retryable());
        assert!(ModelError::Api { status: 429, body: String::new() }.is_retryable());
        assert!(ModelError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!ModelError::Api { status: 401, body: String::new() }.is_retryable());
    }
}
