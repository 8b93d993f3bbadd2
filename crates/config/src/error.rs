use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown provider {provider:?} referenced by model alias {alias:?}")]
    UnknownProvider { alias: String, provider: String },

    #[error("negative limit {field} = {value} for model alias {alias:?}")]
    NegativeLimit { alias: String, field: &'static str, value: i64 },

    #[error("data_residency.allowed_regions is empty but endpoints is non-empty")]
    EmptyAllowedRegions,

    #[error("no endpoint available for model alias {alias}")]
    NoEndpoint { alias: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
