use thiserror::Error;

/// Error kinds surfaced on the gateway's public surface (§6).
///
/// Every other crate in this workspace defines its own narrower error enum
/// and converts into this one at the orchestrator boundary via `#[from]`.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no endpoint available for model alias {alias}")]
    NoEndpoint { alias: String },

    #[error("daily spend limit exceeded: spent {spent_usd} + estimate {estimate_usd} > limit {limit_usd}")]
    QuotaExceeded {
        spent_usd: rust_decimal::Decimal,
        estimate_usd: rust_decimal::Decimal,
        limit_usd: rust_decimal::Decimal,
    },

    #[error("rate limit exhausted for {provider}/{model}: {reason}")]
    RateLimited { provider: String, model: String, reason: String },

    #[error("timeout exceeded while waiting on {0}")]
    TimeoutExceeded(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("call cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
