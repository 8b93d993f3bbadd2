//! Request Orchestrator (§4.8): the public `generate`/`stream` surface that
//! composes model resolution, budget, rate limiting, retry/wait, and the
//! provider adapter into the fixed nine-step per-call sequence.

mod error;
mod hold;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use llmgate_adapter::{AdapterError, AdapterRequest, ProviderAdapter};
use llmgate_budget::{BudgetController, CheckOutcome};
use llmgate_config::{CircuitRegistry, EndpointSelector, MergedConfig};
use llmgate_core::ledger::LedgerEventType;
use llmgate_core::{
    ContentPart, ErrorKind, FinishReason, GenConfig, GenerationResponse, ResolvedCall, StreamEvent,
    Timing, TokenUsage,
};
use llmgate_ledger::Ledger;
use llmgate_limiter::{RateLimiter, ReserveOutcome};
use llmgate_retry::{NextStep, RetryEngine, RetryPolicy};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use error::OrchestratorError;
use hold::HoldGuard;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Composes the gateway's core components behind the public `generate`/
/// `stream` surface. Cheap to clone — all clones share the same ledger,
/// budget controller, limiter, and adapter map, matching the rest of this
/// workspace's handle-sharing convention.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<RwLock<Arc<MergedConfig>>>,
    circuits: Arc<CircuitRegistry>,
    ledger: Ledger,
    budget: Arc<BudgetController>,
    limiter: Arc<RateLimiter>,
    /// Keyed by provider-name prefix; `default_adapter` is tried when no
    /// prefix matches — grounded in the teacher's `Router::clients` +
    /// `default_client` shape.
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_adapter: Arc<dyn ProviderAdapter>,
    call_deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        config: MergedConfig,
        ledger: Ledger,
        default_adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        let daily_limit = config.budget.daily_spend_limit_usd;
        let warn_ratio = config.budget.warn_ratio;
        let strict = config.budget.strict;

        Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
            circuits: Arc::new(CircuitRegistry::new()),
            budget: Arc::new(BudgetController::new(ledger.clone(), daily_limit, warn_ratio, strict)),
            ledger,
            limiter: Arc::new(RateLimiter::new()),
            adapters: HashMap::new(),
            default_adapter,
            call_deadline: Duration::from_secs(60),
        }
    }

    pub fn with_call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = deadline;
        self
    }

    pub fn register_adapter(&mut self, provider_prefix: &str, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider_prefix.to_string(), adapter);
    }

    /// Atomically replaces the config snapshot in-flight calls keep seeing
    /// the old `Arc` they captured (§5 hot-reload).
    pub fn reload_config(&self, config: MergedConfig) {
        *self.config.write() = Arc::new(config);
    }

    fn adapter_for(&self, provider: &str) -> Arc<dyn ProviderAdapter> {
        self.adapters
            .iter()
            .find(|(prefix, _)| provider.starts_with(prefix.as_str()))
            .map(|(_, client)| Arc::clone(client))
            .unwrap_or_else(|| Arc::clone(&self.default_adapter))
    }

    fn resolve(&self, alias: &str) -> Result<ResolvedCall> {
        let config = self.config.read().clone();
        let selector = EndpointSelector::new(&config, &self.circuits);
        selector.resolve(alias).map_err(OrchestratorError::Config)
    }

    fn resilience(&self) -> RetryPolicy {
        let config = self.config.read().clone();
        RetryPolicy {
            max_retries: config.resilience.max_retries,
            base_delay_s: config.resilience.base_delay_s,
            max_delay_s: config.resilience.max_delay_s,
            wait_on_rate_limit: config.resilience.wait_on_rate_limit,
            retry_budget_s: config.resilience.retry_budget_s,
            max_wait_timeout_s: config.resilience.max_wait_timeout_s,
        }
    }

    fn api_key_for(&self, provider: &str) -> Option<String> {
        self.config.read().api_keys.get(provider).cloned()
    }

    fn estimate_cost(&self, resolved: &ResolvedCall, estimated_tokens: u64, config: &GenConfig) -> Decimal {
        let pricing = &resolved.spec.pricing;
        let output_estimate = config.max_output_tokens.unwrap_or(256) as u64;
        let input_cost = pricing.input_per_1m * Decimal::from(estimated_tokens) / Decimal::from(1_000_000u32);
        let output_cost = pricing.output_per_1m * Decimal::from(output_estimate) / Decimal::from(1_000_000u32);
        input_cost + output_cost
    }

    /// `reported` (an adapter's own `cost_usd`) is authoritative when
    /// non-zero (§9 open question 1). Otherwise, if the adapter never
    /// reported usage (`usage_known = false`), fall back to the estimate
    /// computed before the call rather than pricing a `None` as zero cost
    /// (§8 boundary: "Adapter returns usage_known=false → actual_cost falls
    /// back to estimated_cost").
    fn actual_cost(&self, resolved: &ResolvedCall, usage: &TokenUsage, reported: Decimal, estimated: Decimal) -> Decimal {
        if reported != Decimal::ZERO {
            return reported;
        }
        if !usage.usage_known {
            return estimated;
        }
        let pricing = &resolved.spec.pricing;
        let input = Decimal::from(usage.input_tokens.unwrap_or(0));
        let output = Decimal::from(usage.output_tokens.unwrap_or(0));
        pricing.input_per_1m * input / Decimal::from(1_000_000u32)
            + pricing.output_per_1m * output / Decimal::from(1_000_000u32)
    }

    /// Steps 1-6 shared by `generate_async` and `stream_async`: allocate
    /// trace_id, resolve the model, build the request, estimate cost, check
    /// budget, reserve rate limit.
    async fn admit(
        &self,
        parts: Vec<ContentPart>,
        model_alias: &str,
        config: GenConfig,
    ) -> Result<(uuid::Uuid, ResolvedCall, AdapterRequest, Decimal, HoldGuard)> {
        let trace_id = uuid::Uuid::new_v4();
        let resolved = self.resolve(model_alias)?;

        let request = AdapterRequest {
            model_id: resolved.spec.model_id.clone(),
            parts,
            config: config.clone(),
            api_key: self.api_key_for(&resolved.spec.provider),
        };

        let adapter = self.adapter_for(&resolved.spec.provider);
        let estimated_tokens = adapter.estimate_tokens(&request);
        let estimated_cost = self.estimate_cost(&resolved, estimated_tokens, &config);

        match self
            .budget
            .check(trace_id, &resolved.spec.provider, &resolved.spec.model_id, estimated_cost)
            .await
        {
            Ok(CheckOutcome::Allow) => {}
            Ok(CheckOutcome::Warn(w)) => {
                warn!(trace_id = %trace_id, ratio = w.ratio, "budget warning fired");
            }
            Err(e) => {
                self.budget
                    .cancel(trace_id, &resolved.spec.provider, &resolved.spec.model_id, "quota")
                    .await
                    .ok();
                return Err(OrchestratorError::Budget(e));
            }
        }

        let hold = HoldGuard::new(trace_id, resolved.clone(), Arc::clone(&self.budget));

        let wait_on_rate_limit = self.config.read().resilience.wait_on_rate_limit;
        let max_wait = self.config.read().resilience.max_wait_timeout_s;
        let mut waited = 0.0;
        loop {
            match self.limiter.reserve(&resolved.spec.provider, &resolved.spec.model_id, resolved.spec.limits, estimated_tokens) {
                ReserveOutcome::Ready => break,
                ReserveOutcome::Exhausted => {
                    return Err(OrchestratorError::RateLimited {
                        provider: resolved.spec.provider.clone(),
                        model: resolved.spec.model_id.clone(),
                        reason: "limiter exhausted".into(),
                    });
                }
                ReserveOutcome::WaitHint(hint) => {
                    if !wait_on_rate_limit {
                        return Err(OrchestratorError::RateLimited {
                            provider: resolved.spec.provider.clone(),
                            model: resolved.spec.model_id.clone(),
                            reason: "rate limit wait ceiling exceeded".into(),
                        });
                    }
                    if waited + hint > max_wait {
                        return Err(OrchestratorError::Retry(llmgate_retry::RetryError::TimeoutExceeded(
                            "rate limit wait ceiling exceeded".into(),
                        )));
                    }
                    waited += hint;

                    let mut event = llmgate_ledger::new_event(
                        trace_id,
                        LedgerEventType::RetryAttempt,
                        &resolved.spec.provider,
                        &resolved.spec.model_id,
                    );
                    event.metadata = serde_json::json!({ "reason": "rate_limit_wait", "wait_hint_s": hint });
                    self.ledger.append(event, false).await.ok();

                    tokio::time::sleep(Duration::from_secs_f64(hint)).await;
                }
            }
        }

        Ok((trace_id, resolved, request, estimated_cost, hold))
    }

    /// `generate(prompt_or_parts, model_alias, config?) -> GenerationResponse`.
    pub async fn generate_async(
        &self,
        parts: Vec<ContentPart>,
        model_alias: &str,
        config: GenConfig,
    ) -> Result<GenerationResponse> {
        let t0 = Instant::now();
        let (trace_id, resolved, request, estimated_cost, mut hold) =
            self.admit(parts, model_alias, config).await?;

        let adapter = self.adapter_for(&resolved.spec.provider);
        let deadline = Instant::now() + self.call_deadline;
        let mut engine = RetryEngine::new(self.resilience());

        loop {
            match adapter.invoke(request.clone(), deadline).await {
                Ok(mut response) => {
                    self.circuits.report_success(&resolved.endpoint.name);
                    response.trace_id = trace_id;
                    response.timing.total_ms = t0.elapsed().as_millis() as u64;

                    let cost = self.actual_cost(&resolved, &response.usage, response.cost_usd, estimated_cost);
                    response.cost_usd = cost;

                    self.limiter.commit(
                        &resolved.spec.provider,
                        &resolved.spec.model_id,
                        resolved.spec.limits,
                        response.usage.total_tokens.unwrap_or(0),
                    );

                    hold.settle();
                    self.budget
                        .commit(trace_id, &resolved.spec.provider, &resolved.spec.model_id, cost, response.usage)
                        .await
                        .ok();

                    info!(trace_id = %trace_id, model = %resolved.spec.model_id, "generate completed");
                    return Ok(response);
                }
                Err(e) => {
                    self.circuits.report_failure(&resolved.endpoint.name);
                    let kind = classify(&e);

                    match engine.next_step(&kind, wait_hint(&kind)) {
                        Ok(NextStep::RetryAfter(delay)) | Ok(NextStep::WaitThenRetry(delay)) => {
                            let mut event = llmgate_ledger::new_event(
                                trace_id,
                                LedgerEventType::RetryAttempt,
                                &resolved.spec.provider,
                                &resolved.spec.model_id,
                            );
                            event.metadata =
                                serde_json::json!({ "attempt": engine.attempts_made(), "error_kind": format!("{kind:?}") });
                            self.ledger.append(event, false).await.ok();

                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        Ok(NextStep::GiveUp) => {
                            hold.settle();
                            self.budget
                                .commit_failed(trace_id, &resolved.spec.provider, &resolved.spec.model_id, "give_up", &e.to_string())
                                .await
                                .ok();
                            return Err(OrchestratorError::Adapter(e));
                        }
                        Err(retry_err) => {
                            hold.settle();
                            self.budget
                                .commit_failed(
                                    trace_id,
                                    &resolved.spec.provider,
                                    &resolved.spec.model_id,
                                    &format!("{kind:?}"),
                                    &retry_err.to_string(),
                                )
                                .await
                                .ok();
                            // `TimeoutExceeded` (retry budget/ceiling hit) has no
                            // counterpart in the adapter's own classification, so
                            // it surfaces via the retry engine's error directly;
                            // `Fatal`/`Cancelled` keep the original classified
                            // error so auth/cancellation map correctly (§6).
                            return Err(match retry_err {
                                llmgate_retry::RetryError::TimeoutExceeded(_) => OrchestratorError::Retry(retry_err),
                                _ => OrchestratorError::Adapter(e),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Blocking wrapper: constructs a short-lived current-thread runtime and
    /// blocks on `generate_async`, for callers outside a tokio context.
    pub fn generate(&self, parts: Vec<ContentPart>, model_alias: &str, config: GenConfig) -> Result<GenerationResponse> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OrchestratorError::Runtime(e.to_string()))?;
        rt.block_on(self.generate_async(parts, model_alias, config))
    }

    /// `stream(prompt_or_parts, model_alias, config?) -> receiver of StreamEvent`.
    /// Dropping the receiver before the terminal event abandons the call:
    /// the adapter stream is closed and the ledger records `cancelled`.
    pub async fn stream_async(
        &self,
        parts: Vec<ContentPart>,
        model_alias: &str,
        config: GenConfig,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let (trace_id, resolved, request, estimated_cost, mut hold) =
            self.admit(parts, model_alias, config).await?;

        let adapter = self.adapter_for(&resolved.spec.provider);
        let deadline = Instant::now() + self.call_deadline;
        let mut upstream = adapter.stream(request, deadline).await.map_err(OrchestratorError::Adapter)?;

        let (tx, rx) = mpsc::channel(16);
        let budget = Arc::clone(&self.budget);
        let limiter = Arc::clone(&self.limiter);
        let circuits = Arc::clone(&self.circuits);
        let provider = resolved.spec.provider.clone();
        let model_id = resolved.spec.model_id.clone();
        let limits = resolved.spec.limits;
        let pricing = resolved.spec.pricing.clone();
        let endpoint = resolved.endpoint.name.clone();

        tokio::spawn(async move {
            let mut aggregate_cost = Decimal::ZERO;
            let mut final_usage = TokenUsage::default();
            let mut cancelled = false;

            while let Some(event) = upstream.recv().await {
                let is_final = event.is_final;
                if let Some(usage) = event.usage {
                    final_usage = usage;
                }
                if let Some(cost) = event.cost_usd {
                    aggregate_cost = cost;
                }
                if tx.send(event).await.is_err() {
                    cancelled = true;
                    break;
                }
                if is_final {
                    break;
                }
            }

            circuits.report_success(&endpoint);
            limiter.commit(&provider, &model_id, limits, final_usage.total_tokens.unwrap_or(0));
            hold.settle();

            let settled_cost = if aggregate_cost != Decimal::ZERO {
                aggregate_cost
            } else if !final_usage.usage_known {
                estimated_cost
            } else {
                let input = Decimal::from(final_usage.input_tokens.unwrap_or(0));
                let output = Decimal::from(final_usage.output_tokens.unwrap_or(0));
                pricing.input_per_1m * input / Decimal::from(1_000_000u32)
                    + pricing.output_per_1m * output / Decimal::from(1_000_000u32)
            };

            if cancelled {
                budget.commit_cancelled(trace_id, &provider, &model_id, settled_cost, final_usage).await.ok();
            } else {
                budget.commit(trace_id, &provider, &model_id, settled_cost, final_usage).await.ok();
            }
        });

        Ok(rx)
    }

    pub fn stream(&self, parts: Vec<ContentPart>, model_alias: &str, config: GenConfig) -> Result<mpsc::Receiver<StreamEvent>> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OrchestratorError::Runtime(e.to_string()))?;
        rt.block_on(self.stream_async(parts, model_alias, config))
    }

    /// `budget.status_today` surface: today's committed + held spend.
    pub fn budget_status_today(&self) -> Result<llmgate_core::DailySpend> {
        self.ledger.spend_today().map_err(|e| OrchestratorError::Budget(llmgate_budget::BudgetError::Ledger(e)))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.ledger.close().await.map_err(|e| OrchestratorError::Budget(llmgate_budget::BudgetError::Ledger(e)))
    }
}

fn classify(e: &AdapterError) -> ErrorKind {
    match e {
        AdapterError::Classified(c) => c.kind.clone(),
        AdapterError::Network(_) => ErrorKind::Retryable,
        AdapterError::Parse(_) => ErrorKind::Fatal,
    }
}

fn wait_hint(kind: &ErrorKind) -> Option<f64> {
    match kind {
        ErrorKind::RateLimited { wait_hint_s } => *wait_hint_s,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_adapter::MockAdapter;
    use llmgate_core::{Capability, Limits, ModelSpec, Pricing, Task, UnitType};
    use llmgate_core::Endpoint;
    use rust_decimal_macros::dec;
    use std::collections::{BTreeSet, HashMap as StdHashMap};

    fn model_spec(alias: &str) -> ModelSpec {
        ModelSpec {
            alias: alias.into(),
            provider: "acme".into(),
            model_id: "acme-large".into(),
            unit_type: UnitType::Token,
            pricing: Pricing { input_per_1m: dec!(1.00), output_per_1m: dec!(2.00), per_image: None, per_second: None },
            limits: Limits { rpm: 1000, tpm: 1_000_000, rpd: 100_000 },
            capabilities: BTreeSet::from([Capability::Text]),
            extra_config: StdHashMap::new(),
        }
    }

    async fn orchestrator(daily_limit: Decimal, mock: Arc<MockAdapter>) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("l.db")).await.unwrap();

        let mut model_registry = StdHashMap::new();
        model_registry.insert("default".to_string(), model_spec("default"));

        let config = MergedConfig {
            api_keys: StdHashMap::new(),
            endpoints: vec![Endpoint { name: "acme-primary".into(), url: "https://example.invalid".into(), region: "us".into() }],
            model_registry,
            routing_policies: Vec::new(),
            data_residency: Default::default(),
            resilience: Default::default(),
            budget: llmgate_config::BudgetConfig { daily_spend_limit_usd: daily_limit, warn_ratio: 0.8, strict: false },
            network: Default::default(),
            endpoints_filtered_count: 0,
            policy_conflict_count: 0,
        };

        (Orchestrator::new(config, ledger, mock as Arc<dyn ProviderAdapter>), dir)
    }

    fn text(s: &str) -> Vec<ContentPart> {
        vec![ContentPart::Text { text: s.into() }]
    }

    #[tokio::test]
    async fn happy_path_commits_and_returns_response() {
        let mock = Arc::new(MockAdapter::new());
        let (orch, _dir) = orchestrator(dec!(5.00), Arc::clone(&mock)).await;
        mock.push_response(GenerationResponse {
            content: "hello".into(),
            media_parts: Vec::new(),
            model: "acme-large".into(),
            provider: "acme".into(),
            usage: TokenUsage { input_tokens: Some(10), output_tokens: Some(5), total_tokens: Some(15), usage_known: true, ..Default::default() },
            cost_usd: Decimal::ZERO,
            finish_reason: FinishReason::Stop,
            trace_id: uuid::Uuid::nil(),
            timing: Timing::default(),
            provider_meta: Default::default(),
        });

        let response = orch
            .generate_async(text("hi"), "default", GenConfig { task: Task::Chat, ..Default::default() })
            .await
            .unwrap();

        assert_eq!(response.content, "hello");
        let spend = orch.budget_status_today().unwrap();
        assert!(spend.total() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn quota_exceeded_is_surfaced_and_call_never_reaches_adapter() {
        let (orch, _dir) = orchestrator(dec!(0.0), Arc::new(MockAdapter::new())).await;
        let err = orch
            .generate_async(text("hi"), "default", GenConfig { task: Task::Chat, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Budget(_)));
    }

    #[tokio::test]
    async fn auth_error_is_not_retried_and_maps_to_auth_error() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_error(llmgate_adapter::ClassifiedError::retryable("timeout"));
        mock.push_error(llmgate_adapter::ClassifiedError::retryable("timeout"));
        mock.push_error(llmgate_adapter::ClassifiedError::auth("401 unauthorized"));
        let (orch, _dir) = orchestrator(dec!(5.00), Arc::clone(&mock)).await;

        let err = orch
            .generate_async(text("hi"), "default", GenConfig { task: Task::Chat, ..Default::default() })
            .await
            .unwrap_err();

        let gateway_err: llmgate_core::GatewayError = err.into();
        assert!(matches!(gateway_err, llmgate_core::GatewayError::AuthError(_)));
    }

    #[tokio::test]
    async fn retries_exhausted_surfaces_timeout_exceeded() {
        let mock = Arc::new(MockAdapter::new());
        for _ in 0..4 {
            mock.push_error(llmgate_adapter::ClassifiedError::retryable("upstream hiccup"));
        }
        let (orch, _dir) = orchestrator(dec!(5.00), Arc::clone(&mock)).await;
        orch.reload_config({
            let mut config = (*orch.config.read().clone()).clone();
            config.resilience.max_retries = 2;
            config
        });

        let err = orch
            .generate_async(text("hi"), "default", GenConfig { task: Task::Chat, ..Default::default() })
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Retry(llmgate_retry::RetryError::TimeoutExceeded(_))));
        let gateway_err: llmgate_core::GatewayError = err.into();
        assert!(matches!(gateway_err, llmgate_core::GatewayError::TimeoutExceeded(_)));

        let spend = orch.budget_status_today().unwrap();
        assert_eq!(spend.total(), Decimal::ZERO, "a failed call must not leave a phantom hold");
    }

    #[tokio::test]
    async fn unknown_alias_surfaces_no_endpoint() {
        let (orch, _dir) = orchestrator(dec!(5.00), Arc::new(MockAdapter::new())).await;
        let err = orch
            .generate_async(text("hi"), "does-not-exist", GenConfig { task: Task::Chat, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
