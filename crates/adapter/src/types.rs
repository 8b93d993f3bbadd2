use llmgate_core::{ContentPart, ErrorKind, GenConfig};
use thiserror::Error;

/// Normalized internal request an adapter receives, built by the Orchestrator
/// from the caller's content parts plus the resolved `GenConfig` (§4.8 step 3).
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub model_id: String,
    pub parts: Vec<ContentPart>,
    pub config: GenConfig,
    pub api_key: Option<String>,
}

/// Error an adapter surfaces, already classified per the §4.6 taxonomy.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Classified(#[from] ClassifiedError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("response parsing failed: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Retryable, message: message.into() }
    }
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Fatal, message: message.into() }
    }
    pub fn auth(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Auth, message: message.into() }
    }
    pub fn rate_limited(message: impl Into<String>, wait_hint_s: Option<f64>) -> Self {
        Self { kind: ErrorKind::RateLimited { wait_hint_s }, message: message.into() }
    }
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Cancelled, message: message.into() }
    }
}
