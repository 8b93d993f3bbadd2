use thiserror::Error;

/// Error surfaced by the Orchestrator's public `generate`/`stream` methods.
/// Converts into `llmgate_core::GatewayError` for callers that want the
/// workspace-wide error type instead of this crate's own.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] llmgate_config::ConfigError),

    #[error("budget error: {0}")]
    Budget(#[from] llmgate_budget::BudgetError),

    #[error("rate limit exhausted for {provider}/{model}: {reason}")]
    RateLimited { provider: String, model: String, reason: String },

    #[error("adapter error: {0}")]
    Adapter(#[from] llmgate_adapter::AdapterError),

    #[error("retry engine error: {0}")]
    Retry(#[from] llmgate_retry::RetryError),

    #[error("failed to start blocking runtime: {0}")]
    Runtime(String),
}

impl From<OrchestratorError> for llmgate_core::GatewayError {
    fn from(e: OrchestratorError) -> Self {
        use llmgate_core::GatewayError;
        match e {
            OrchestratorError::Config(c) => GatewayError::Config(c.to_string()),
            OrchestratorError::Budget(llmgate_budget::BudgetError::QuotaExceeded { spent_usd, estimate_usd, limit_usd }) => {
                GatewayError::QuotaExceeded { spent_usd, estimate_usd, limit_usd }
            }
            OrchestratorError::Budget(b) => GatewayError::Other(anyhow::anyhow!(b.to_string())),
            OrchestratorError::RateLimited { provider, model, reason } => {
                GatewayError::RateLimited { provider, model, reason }
            }
            OrchestratorError::Adapter(llmgate_adapter::AdapterError::Classified(c)) => match c.kind {
                llmgate_core::ErrorKind::Fatal => GatewayError::ProviderError(c.message),
                llmgate_core::ErrorKind::Auth => GatewayError::AuthError(c.message),
                llmgate_core::ErrorKind::Cancelled => GatewayError::Cancelled,
                llmgate_core::ErrorKind::RateLimited { .. } => {
                    GatewayError::RateLimited { provider: String::new(), model: String::new(), reason: c.message }
                }
                llmgate_core::ErrorKind::Retryable => GatewayError::ProviderError(c.message),
            },
            OrchestratorError::Adapter(a) => GatewayError::ProviderError(a.to_string()),
            OrchestratorError::Retry(llmgate_retry::RetryError::TimeoutExceeded(s)) => GatewayError::TimeoutExceeded(s),
            OrchestratorError::Retry(llmgate_retry::RetryError::Cancelled) => GatewayError::Cancelled,
            OrchestratorError::Retry(llmgate_retry::RetryError::Fatal(s)) => GatewayError::ProviderError(s),
            OrchestratorError::Runtime(s) => GatewayError::Other(anyhow::anyhow!(s)),
        }
    }
}
