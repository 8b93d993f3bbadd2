use std::collections::{HashMap, HashSet};

use llmgate_core::{Endpoint, ModelSpec, RoutingPolicy};
use serde::{Deserialize, Serialize};

/// `resilience` section: back-off and wait policy shared by the Retry Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_s")]
    pub base_delay_s: f64,
    #[serde(default = "default_max_delay_s")]
    pub max_delay_s: f64,
    #[serde(default)]
    pub wait_on_rate_limit: bool,
    #[serde(default = "default_retry_budget_s")]
    pub retry_budget_s: f64,
    #[serde(default = "default_max_wait_timeout_s")]
    pub max_wait_timeout_s: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_s() -> f64 {
    0.5
}
fn default_max_delay_s() -> f64 {
    30.0
}
fn default_retry_budget_s() -> f64 {
    60.0
}
fn default_max_wait_timeout_s() -> f64 {
    120.0
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_s: default_base_delay_s(),
            max_delay_s: default_max_delay_s(),
            wait_on_rate_limit: false,
            retry_budget_s: default_retry_budget_s(),
            max_wait_timeout_s: default_max_wait_timeout_s(),
        }
    }
}

/// `budget` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub daily_spend_limit_usd: rust_decimal::Decimal,
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
    /// Strict mode requires a durable `precheck_hold` before admitting a call (§4.4).
    #[serde(default)]
    pub strict: bool,
}

fn default_warn_ratio() -> f64 {
    0.8
}

/// `network` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy_bypass_providers: Vec<String>,
}

/// Immutable snapshot produced by the Configuration Resolver (§3 `MergedConfig`).
///
/// Built once per process (or on an explicit, non-concurrent reload); never
/// mutated. Orchestrator holds this behind `Arc<RwLock<Arc<MergedConfig>>>` so
/// in-flight calls keep seeing the snapshot they started with (§5).
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub api_keys: HashMap<String, String>,
    pub endpoints: Vec<Endpoint>,
    pub model_registry: HashMap<String, ModelSpec>,
    pub routing_policies: Vec<RoutingPolicy>,
    pub data_residency: HashSet<String>,
    pub resilience: ResilienceConfig,
    pub budget: BudgetConfig,
    pub network: NetworkConfig,
    /// Count of user-supplied endpoints dropped because their region was not
    /// in `data_residency` (§4.1 diagnostic counter).
    pub endpoints_filtered_count: u32,
    /// Count of user routing policies that collided with a project one and
    /// were dropped in favour of project-wins (§9 Open Question).
    pub policy_conflict_count: u32,
}

/// On-disk shape of `llm.project.yaml` (and `llm.project.d/*.yaml` fragments).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub model_registry: HashMap<String, ModelSpec>,
    #[serde(default)]
    pub routing_policies: Vec<RoutingPolicy>,
    #[serde(default)]
    pub data_residency: DataResidency,
    #[serde(default)]
    pub resilience: Option<ResilienceConfig>,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataResidency {
    #[serde(default)]
    pub allowed_regions: HashSet<String>,
}

/// On-disk shape of the user `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFile {
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub daily_spend_limit: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub personal_model_overrides: HashMap<String, ModelSpec>,
    #[serde(default)]
    pub personal_routing_policies: Vec<RoutingPolicy>,
    #[serde(default)]
    pub network: NetworkUserSection,
    #[serde(default)]
    pub resilience: Option<ResilienceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkUserSection {
    #[serde(default)]
    pub proxy_bypass_enabled: bool,
    #[serde(default)]
    pub bypass_proxy: Vec<String>,
}
