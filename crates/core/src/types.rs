use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type TraceId = uuid::Uuid;
pub type EventId = uuid::Uuid;

/// Unit a model is priced and rate-limited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Token,
    Image,
    AudioSecond,
    Character,
}

/// A model capability flag, used for routing and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Vision,
    Tts,
    Asr,
    ImageGen,
    VideoGen,
    Thinking,
}

/// Per-unit pricing for a model. All monetary fields are exact `Decimal`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1m: Decimal,
    pub output_per_1m: Decimal,
    pub per_image: Option<Decimal>,
    pub per_second: Option<Decimal>,
}

/// Request-per-minute / tokens-per-minute / requests-per-day caps for a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub rpm: u32,
    pub tpm: u32,
    pub rpd: u32,
}

/// Concrete record a model alias resolves to (§3 `ModelSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub alias: String,
    pub provider: String,
    pub model_id: String,
    pub unit_type: UnitType,
    pub pricing: Pricing,
    pub limits: Limits,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub extra_config: HashMap<String, serde_json::Value>,
}

/// A single chunk of multi-modal request content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { bytes: Option<Vec<u8>>, uri: Option<String>, mime: String },
    Audio { bytes: Option<Vec<u8>>, uri: Option<String>, mime: String },
    File { uri: String },
}

/// The kind of generation being requested, drives which `GenConfig` fields apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Chat,
    Tts,
    Asr,
    ImageGen,
    VideoGen,
}

/// Per-call overrides layered on top of the resolved `ModelSpec` (§3 `GenConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenConfig {
    pub task: Task,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub voice_config: Option<serde_json::Value>,
    pub image_size: Option<String>,
    pub aspect_ratio: Option<String>,
    pub thought_mode: Option<bool>,
    pub stream: Option<bool>,
    pub full_response: Option<bool>,
    pub optimize_images: Option<bool>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            task: Task::Chat,
            temperature: None,
            max_output_tokens: None,
            voice_config: None,
            image_size: None,
            aspect_ratio: None,
            thought_mode: None,
            stream: None,
            full_response: Some(true),
            optimize_images: None,
        }
    }
}

/// Multi-unit usage accounting; any field may be unknown (adapter did not report it).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub images: Option<u64>,
    pub audio_seconds: Option<f64>,
    pub tts_characters: Option<u64>,
    /// Whether the adapter actually reported usage, vs. this being all-`None`.
    pub usage_known: bool,
}

/// Why a generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    SafetyBlocked,
    Error,
    Cancelled,
}

/// Latency breakdown for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub ttft_ms: Option<u64>,
    pub total_ms: u64,
}

/// The normalized response every adapter call collapses to (§3 `GenerationResponse`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub media_parts: Vec<ContentPart>,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub cost_usd: Decimal,
    pub finish_reason: FinishReason,
    pub trace_id: TraceId,
    pub timing: Timing,
    #[serde(default)]
    pub provider_meta: HashMap<String, serde_json::Value>,
}

/// A class of adapter error, drives Retry/Wait Engine behaviour (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retryable,
    RateLimited { wait_hint_s: Option<f64> },
    /// Authentication/authorization failure (e.g. invalid API key, expired
    /// token). Never retried, same as `Fatal`, but surfaced to callers as
    /// `GatewayError::AuthError` rather than a generic provider error (§6, §8
    /// scenario 4).
    Auth,
    Fatal,
    Cancelled,
}

/// One unit of a streamed generation (§3 `StreamEvent`). The terminal event has
/// `is_final = true` and carries the aggregate usage/cost for the whole call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub delta: String,
    pub media_delta: Option<Vec<u8>>,
    pub is_final: bool,
    pub usage: Option<TokenUsage>,
    pub cost_usd: Option<Decimal>,
    pub error: Option<ErrorKind>,
}

/// A single endpoint a provider can be reached at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub region: String,
}

/// One entry of a `routing_policies` list: which providers are tried, in order,
/// for a given alias or capability match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub match_alias: Option<String>,
    pub provider_order: Vec<String>,
}

/// Result of resolving an alias through the registry and endpoint selector.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub spec: ModelSpec,
    pub endpoint: Endpoint,
}
