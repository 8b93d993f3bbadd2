use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use llmgate_core::{Endpoint, ModelSpec, RoutingPolicy};

use crate::error::{ConfigError, Result};
use crate::types::{BudgetConfig, MergedConfig, NetworkConfig, ProjectFile, ResilienceConfig, UserFile};

const ENV_PROVIDER_KEY_PREFIX: &str = "LLM_PROVIDER_";
const ENV_PROVIDER_KEY_SUFFIX: &str = "_API_KEY";

/// Resolves project + user + environment configuration layers into a single
/// immutable `MergedConfig` (§4.1). Pure function of its inputs — no global
/// state, no hidden I/O beyond the paths it is given.
pub struct ConfigResolver;

impl ConfigResolver {
    /// `project_dir` is the directory containing `llm.project.yaml` and
    /// `llm.project.d/`. `user_config_path` overrides the default user
    /// config lookup (`<user-config-home>/llm-sdk/config.yaml`, falling back
    /// to `<project_dir>/config.yaml`).
    pub fn resolve(project_dir: &Path, user_config_path: Option<&Path>) -> Result<MergedConfig> {
        let project = Self::load_project(project_dir)?;
        let user_path = user_config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::default_user_config_path(project_dir));
        let user = Self::load_user(&user_path)?;

        let merged = Self::merge(project, user)?;
        Self::validate(&merged)?;
        Ok(merged)
    }

    fn default_user_config_path(project_dir: &Path) -> PathBuf {
        if let Some(home) = dirs_config_home() {
            let candidate = home.join("llm-sdk").join("config.yaml");
            if candidate.exists() {
                return candidate;
            }
        }
        project_dir.join("config.yaml")
    }

    fn load_project(project_dir: &Path) -> Result<ProjectFile> {
        let main_path = project_dir.join("llm.project.yaml");
        let mut project: ProjectFile = if main_path.exists() {
            read_yaml(&main_path)?
        } else {
            ProjectFile::default()
        };

        let fragments_dir = project_dir.join("llm.project.d");
        if fragments_dir.is_dir() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(&fragments_dir)
                .map_err(|source| ConfigError::Io { path: fragments_dir.display().to_string(), source })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().map(|ext| ext == "yaml" || ext == "yml").unwrap_or(false))
                .collect();
            paths.sort();
            for path in paths {
                let fragment: ProjectFile = read_yaml(&path)?;
                project.model_registry.extend(fragment.model_registry);
                project.routing_policies.extend(fragment.routing_policies);
                project.data_residency.allowed_regions.extend(fragment.data_residency.allowed_regions);
                if fragment.resilience.is_some() {
                    project.resilience = fragment.resilience;
                }
                project.settings.extend(fragment.settings);
            }
        }

        Ok(project)
    }

    fn load_user(path: &Path) -> Result<UserFile> {
        if path.exists() {
            read_yaml(path)
        } else {
            Ok(UserFile::default())
        }
    }

    /// Merge semantics (§4.1):
    /// - model registry: project last-wins overlay, then `personal_model_overrides`
    ///   fills keys project didn't define (user-wins only for gaps).
    /// - routing policies: `project ++ user`, order preserved.
    /// - endpoints: user-supplied list filtered by project `data_residency`.
    /// - scalars: explicit arg > env > user file > project file > built-in default
    ///   (the explicit-arg layer is the caller's responsibility above this resolver).
    fn merge(project: ProjectFile, user: UserFile) -> Result<MergedConfig> {
        let mut model_registry: HashMap<String, ModelSpec> = project.model_registry.clone();
        for (alias, spec) in user.personal_model_overrides {
            model_registry.entry(alias).or_insert(spec);
        }

        // Project wins on a routing-policy collision (§9 Open Question 2): a
        // user policy matching an alias the project already routes is
        // dropped rather than appended, and counted as a diagnostic.
        let project_aliases: HashSet<&str> = project
            .routing_policies
            .iter()
            .filter_map(|p| p.match_alias.as_deref())
            .collect();
        let mut routing_policies: Vec<RoutingPolicy> = project.routing_policies;
        let mut policy_conflict_count = 0u32;
        for policy in user.personal_routing_policies {
            match policy.match_alias.as_deref() {
                Some(alias) if project_aliases.contains(alias) => policy_conflict_count += 1,
                _ => routing_policies.push(policy),
            }
        }

        let allowed_regions: HashSet<String> = project.data_residency.allowed_regions;
        let mut endpoints_filtered_count = 0u32;
        let endpoints: Vec<Endpoint> = user
            .endpoints
            .into_iter()
            .filter(|ep| {
                let keep = allowed_regions.is_empty() || allowed_regions.contains(&ep.region);
                if !keep {
                    endpoints_filtered_count += 1;
                }
                keep
            })
            .collect();

        let mut api_keys = user.api_keys;
        apply_env_api_keys(&mut api_keys);

        let resilience = user.resilience.or(project.resilience).unwrap_or_default();

        let daily_spend_limit_usd = user
            .daily_spend_limit
            .unwrap_or_else(|| rust_decimal::Decimal::new(0, 0));

        let budget = BudgetConfig {
            daily_spend_limit_usd,
            warn_ratio: 0.8,
            strict: false,
        };

        let network = NetworkConfig {
            proxy_bypass_providers: if user.network.proxy_bypass_enabled {
                user.network.bypass_proxy
            } else {
                Vec::new()
            },
        };

        Ok(MergedConfig {
            api_keys,
            endpoints,
            model_registry,
            routing_policies,
            data_residency: allowed_regions,
            resilience,
            budget,
            network,
            endpoints_filtered_count,
            policy_conflict_count,
        })
    }

    fn validate(merged: &MergedConfig) -> Result<()> {
        for (alias, spec) in &merged.model_registry {
            if spec.provider.trim().is_empty() {
                return Err(ConfigError::UnknownProvider {
                    alias: alias.clone(),
                    provider: spec.provider.clone(),
                });
            }
            if (spec.limits.rpm as i64) < 0 {
                return Err(ConfigError::NegativeLimit { alias: alias.clone(), field: "rpm", value: spec.limits.rpm as i64 });
            }
            if (spec.limits.tpm as i64) < 0 {
                return Err(ConfigError::NegativeLimit { alias: alias.clone(), field: "tpm", value: spec.limits.tpm as i64 });
            }
            if (spec.limits.rpd as i64) < 0 {
                return Err(ConfigError::NegativeLimit { alias: alias.clone(), field: "rpd", value: spec.limits.rpd as i64 });
            }
        }

        if merged.data_residency.is_empty() && !merged.endpoints.is_empty() {
            return Err(ConfigError::EmptyAllowedRegions);
        }

        Ok(())
    }
}

fn read_yaml<T: for<'de> serde::Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

fn apply_env_api_keys(api_keys: &mut HashMap<String, String>) {
    for (key, value) in std::env::vars() {
        if let Some(rest) = key.strip_prefix(ENV_PROVIDER_KEY_PREFIX) {
            if let Some(provider) = rest.strip_suffix(ENV_PROVIDER_KEY_SUFFIX) {
                api_keys.insert(provider.to_lowercase(), value);
            }
        }
    }
}

fn dirs_config_home() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
}
