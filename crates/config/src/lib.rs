pub mod circuit;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod types;

pub use circuit::CircuitRegistry;
pub use error::{ConfigError, Result};
pub use registry::EndpointSelector;
pub use resolver::ConfigResolver;
pub use types::{BudgetConfig, MergedConfig, NetworkConfig, ResilienceConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn merges_project_and_user_layers() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "llm.project.yaml",
            r#"
model_registry:
  m1:
    alias: m1
    provider: acme
    model_id: acme-large
    unit_type: token
    pricing: {input_per_1m: "1.00", output_per_1m: "3.00"}
    limits: {rpm: 60, tpm: 100000, rpd: 1000}
    capabilities: [text]
routing_policies: []
data_residency:
  allowed_regions: [us]
"#,
        );
        write_file(
            dir.path(),
            "config.yaml",
            r#"
api_keys:
  acme: "sk-test"
endpoints:
  - name: acme-us
    url: "https://acme.example/us"
    region: us
  - name: acme-eu
    url: "https://acme.example/eu"
    region: eu
daily_spend_limit: "5.00"
"#,
        );

        let merged = ConfigResolver::resolve(dir.path(), None).unwrap();
        assert_eq!(merged.model_registry.len(), 1);
        assert_eq!(merged.endpoints.len(), 1, "eu endpoint must be filtered out");
        assert_eq!(merged.endpoints_filtered_count, 1);
        assert_eq!(merged.api_keys.get("acme").map(String::as_str), Some("sk-test"));
    }

    #[test]
    fn user_routing_policy_colliding_with_project_is_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "llm.project.yaml",
            r#"
model_registry: {}
routing_policies:
  - match_alias: m1
    provider_order: [acme]
data_residency:
  allowed_regions: [us]
"#,
        );
        write_file(
            dir.path(),
            "config.yaml",
            r#"
personal_routing_policies:
  - match_alias: m1
    provider_order: [other]
  - match_alias: m2
    provider_order: [other]
"#,
        );

        let merged = ConfigResolver::resolve(dir.path(), None).unwrap();
        assert_eq!(merged.routing_policies.len(), 2, "m1 collision dropped, m2 kept");
        assert_eq!(merged.policy_conflict_count, 1);
        assert!(merged
            .routing_policies
            .iter()
            .any(|p| p.match_alias.as_deref() == Some("m1") && p.provider_order == vec!["acme".to_string()]));
    }

    #[test]
    fn rejects_non_empty_endpoints_with_empty_allowed_regions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "llm.project.yaml", "model_registry: {}\nrouting_policies: []\n");
        write_file(
            dir.path(),
            "config.yaml",
            r#"
endpoints:
  - name: acme-us
    url: "https://acme.example/us"
    region: us
"#,
        );

        let err = ConfigResolver::resolve(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAllowedRegions));
    }

    #[test]
    fn endpoint_selector_skips_open_circuit() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "llm.project.yaml",
            r#"
model_registry:
  m1:
    alias: m1
    provider: acme
    model_id: acme-large
    unit_type: token
    pricing: {input_per_1m: "1.00", output_per_1m: "3.00"}
    limits: {rpm: 60, tpm: 100000, rpd: 1000}
    capabilities: [text]
routing_policies: []
data_residency:
  allowed_regions: [us]
"#,
        );
        write_file(
            dir.path(),
            "config.yaml",
            r#"
endpoints:
  - name: acme-us-1
    url: "https://acme.example/us1"
    region: us
  - name: acme-us-2
    url: "https://acme.example/us2"
    region: us
"#,
        );

        let merged = ConfigResolver::resolve(dir.path(), None).unwrap();
        let circuits = CircuitRegistry::new().with_thresholds(1, std::time::Duration::from_secs(60), std::time::Duration::from_secs(30));
        circuits.report_failure("acme-us-1");

        let selector = EndpointSelector::new(&merged, &circuits);
        let resolved = selector.resolve("m1").unwrap();
        assert_eq!(resolved.endpoint.name, "acme-us-2");
    }
}
