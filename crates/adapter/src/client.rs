//! Provider adapter contract (§4.7) plus a `MockAdapter` for tests and a
//! thin `HttpAdapter` reference implementation. Real vendor wire adapters are
//! out of scope here — adapters own authentication, wire protocol, and
//! translating usage/errors into this workspace's taxonomy; they must never
//! write to the Ledger directly.

use std::time::Instant;

use async_trait::async_trait;
use llmgate_core::{FinishReason, GenerationResponse, StreamEvent, Timing, TokenUsage};
use tokio::sync::mpsc;

use crate::types::{AdapterError, AdapterRequest, ClassifiedError};

/// The interface every provider implements. Both the blocking-style
/// `invoke`/`stream` surface and their async duals share this one contract —
/// in this async-first workspace they are the same methods (§9: the
/// iterator/async-iterator duality is specified once, here).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn invoke(&self, request: AdapterRequest, deadline: Instant) -> Result<GenerationResponse, AdapterError>;

    /// Returns a receiver the caller polls with `.recv().await`; the stream
    /// ends when it yields `None` or an event with `is_final = true`.
    /// Dropping the receiver before either tells the adapter to release its
    /// transport — the at-most-one-terminal-event contract of §4.7/§4.8 step 7.
    async fn stream(&self, request: AdapterRequest, deadline: Instant) -> Result<mpsc::Receiver<StreamEvent>, AdapterError>;

    /// Best-effort input-token estimate; conservative upper bound preferred.
    fn estimate_tokens(&self, request: &AdapterRequest) -> u64;
}

/// Canned-response adapter for tests, a direct generalisation of the
/// request/response mocking the rest of this workspace's pack uses.
pub struct MockAdapter {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<GenerationResponse, ClassifiedError>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self { responses: parking_lot::Mutex::new(std::collections::VecDeque::new()) }
    }

    pub fn push_response(&self, response: GenerationResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: ClassifiedError) {
        self.responses.lock().push_back(Err(error));
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn invoke(&self, request: AdapterRequest, _deadline: Instant) -> Result<GenerationResponse, AdapterError> {
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(AdapterError::Classified(e)),
            None => Err(AdapterError::Classified(ClassifiedError::fatal(format!(
                "MockAdapter exhausted canned responses for model {}",
                request.model_id
            )))),
        }
    }

    async fn stream(&self, request: AdapterRequest, deadline: Instant) -> Result<mpsc::Receiver<StreamEvent>, AdapterError> {
        let response = self.invoke(request, deadline).await?;
        let (tx, rx) = mpsc::channel(4);
        let _ = tx
            .send(StreamEvent {
                delta: response.content,
                media_delta: None,
                is_final: true,
                usage: Some(response.usage),
                cost_usd: Some(response.cost_usd),
                error: None,
            })
            .await;
        Ok(rx)
    }

    fn estimate_tokens(&self, request: &AdapterRequest) -> u64 {
        request
            .parts
            .iter()
            .map(|p| match p {
                llmgate_core::ContentPart::Text { text } => (text.len() / 4) as u64,
                _ => 256,
            })
            .sum::<u64>()
            .max(1)
    }
}

/// Thin JSON-over-HTTP reference adapter. Demonstrates how a real wire
/// adapter satisfies `ProviderAdapter`; it is not a certified vendor binding.
pub struct HttpAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn prompt_text(request: &AdapterRequest) -> String {
        request
            .parts
            .iter()
            .filter_map(|p| match p {
                llmgate_core::ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    async fn invoke(&self, request: AdapterRequest, deadline: Instant) -> Result<GenerationResponse, AdapterError> {
        let t0 = Instant::now();
        let timeout = deadline.saturating_duration_since(Instant::now());

        let body = serde_json::json!({
            "model": request.model_id,
            "prompt": Self::prompt_text(&request),
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_output_tokens,
        });

        let mut req = self.client.post(format!("{}/v1/complete", self.base_url)).json(&body);
        if let Some(key) = &request.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .timeout(timeout)
            .send()
            .await
            .map_err(AdapterError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::Classified(ClassifiedError::rate_limited("429 from upstream", None)));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AdapterError::Classified(ClassifiedError::auth(format!("http {status}"))));
        }
        if status.is_client_error() {
            return Err(AdapterError::Classified(ClassifiedError::fatal(format!("http {status}"))));
        }
        if status.is_server_error() {
            return Err(AdapterError::Classified(ClassifiedError::retryable(format!("http {status}"))));
        }

        let parsed: serde_json::Value = response.json().await.map_err(AdapterError::Network)?;
        let content = parsed["content"].as_str().unwrap_or_default().to_string();
        let input_tokens = parsed["usage"]["input_tokens"].as_u64();
        let output_tokens = parsed["usage"]["output_tokens"].as_u64();

        Ok(GenerationResponse {
            content,
            media_parts: Vec::new(),
            model: request.model_id,
            provider: self.base_url.clone(),
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: match (input_tokens, output_tokens) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                },
                images: None,
                audio_seconds: None,
                tts_characters: None,
                usage_known: input_tokens.is_some() && output_tokens.is_some(),
            },
            cost_usd: rust_decimal::Decimal::ZERO,
            finish_reason: FinishReason::Stop,
            trace_id: uuid::Uuid::new_v4(),
            timing: Timing { ttft_ms: None, total_ms: t0.elapsed().as_millis() as u64 },
            provider_meta: Default::default(),
        })
    }

    async fn stream(&self, request: AdapterRequest, deadline: Instant) -> Result<mpsc::Receiver<StreamEvent>, AdapterError> {
        let response = self.invoke(request, deadline).await?;
        let (tx, rx) = mpsc::channel(4);
        let _ = tx
            .send(StreamEvent {
                delta: response.content,
                media_delta: None,
                is_final: true,
                usage: Some(response.usage),
                cost_usd: Some(response.cost_usd),
                error: None,
            })
            .await;
        Ok(rx)
    }

    fn estimate_tokens(&self, request: &AdapterRequest) -> u64 {
        (Self::prompt_text(request).len() / 4).max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_core::{ContentPart, Task};
    use std::time::Duration;

    fn request(text: &str) -> AdapterRequest {
        AdapterRequest {
            model_id: "test-model".into(),
            parts: vec![ContentPart::Text { text: text.into() }],
            config: GenConfig { task: Task::Chat, ..Default::default() },
            api_key: None,
        }
    }

    fn response(content: &str) -> GenerationResponse {
        GenerationResponse {
            content: content.into(),
            media_parts: Vec::new(),
            model: "test-model".into(),
            provider: "mock".into(),
            usage: TokenUsage { usage_known: false, ..Default::default() },
            cost_usd: rust_decimal::Decimal::ZERO,
            finish_reason: FinishReason::Stop,
            trace_id: uuid::Uuid::new_v4(),
            timing: Timing { ttft_ms: None, total_ms: 0 },
            provider_meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn mock_adapter_returns_queued_responses_in_order() {
        let adapter = MockAdapter::new();
        adapter.push_response(response("first"));
        adapter.push_response(response("second"));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let first = adapter.invoke(request("hi"), deadline).await.unwrap();
        let second = adapter.invoke(request("hi"), deadline).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "second");
    }

    #[tokio::test]
    async fn mock_adapter_surfaces_classified_errors() {
        let adapter = MockAdapter::new();
        adapter.push_error(ClassifiedError::rate_limited("slow down", Some(2.0)));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let err = adapter.invoke(request("hi"), deadline).await.unwrap_err();
        match err {
            AdapterError::Classified(c) => assert!(matches!(c.kind, llmgate_core::ErrorKind::RateLimited { .. })),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_adapter_exhaustion_is_fatal() {
        let adapter = MockAdapter::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let err = adapter.invoke(request("hi"), deadline).await.unwrap_err();
        match err {
            AdapterError::Classified(c) => assert_eq!(c.kind, llmgate_core::ErrorKind::Fatal),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_emits_a_single_final_event_with_usage() {
        let adapter = MockAdapter::new();
        let mut r = response("hello");
        r.usage = TokenUsage { output_tokens: Some(3), usage_known: true, ..Default::default() };
        adapter.push_response(r);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let mut rx = adapter.stream(request("hi"), deadline).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_final);
        assert_eq!(event.delta, "hello");
        assert!(event.usage.unwrap().usage_known);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn estimate_tokens_is_never_zero() {
        let adapter = MockAdapter::new();
        let estimate = adapter.estimate_tokens(&request(""));
        assert!(estimate >= 1);
    }
}
