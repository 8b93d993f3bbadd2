use llmgate_core::{Endpoint, ResolvedCall};

use crate::circuit::CircuitRegistry;
use crate::error::{ConfigError, Result};
use crate::types::MergedConfig;

/// Resolves a model alias to a concrete `(provider, model_id, endpoint,
/// pricing, limits)` tuple using the merged routing rules (§4.2).
pub struct EndpointSelector<'a> {
    config: &'a MergedConfig,
    circuits: &'a CircuitRegistry,
}

impl<'a> EndpointSelector<'a> {
    pub fn new(config: &'a MergedConfig, circuits: &'a CircuitRegistry) -> Self {
        Self { config, circuits }
    }

    /// `resolve(alias) -> ResolvedCall`. Selection rule: first endpoint in the
    /// filtered ordered list whose provider matches the spec; tie-break is
    /// list order. Endpoints the circuit registry marks open are skipped; if
    /// all match candidates are open, the oldest-opened one is tried as a
    /// probe instead of failing outright.
    pub fn resolve(&self, alias: &str) -> Result<ResolvedCall> {
        let spec = self
            .config
            .model_registry
            .get(alias)
            .cloned()
            .ok_or_else(|| ConfigError::NoEndpoint { alias: alias.to_string() })?;

        let candidates: Vec<&Endpoint> = self
            .config
            .endpoints
            .iter()
            .filter(|ep| provider_matches(ep, &spec.provider))
            .collect();

        if candidates.is_empty() {
            return Err(ConfigError::NoEndpoint { alias: alias.to_string() });
        }

        let chosen = candidates
            .iter()
            .find(|ep| !self.circuits.is_open(&ep.name))
            .copied()
            .or_else(|| {
                let names: Vec<&str> = candidates.iter().map(|ep| ep.name.as_str()).collect();
                self.circuits
                    .oldest_open(names.into_iter())
                    .and_then(|name| candidates.iter().find(|ep| ep.name == name).copied())
            })
            .ok_or_else(|| ConfigError::NoEndpoint { alias: alias.to_string() })?;

        Ok(ResolvedCall { spec, endpoint: chosen.clone() })
    }
}

fn provider_matches(endpoint: &Endpoint, provider: &str) -> bool {
    endpoint.name.starts_with(provider) || endpoint.name == provider
}
