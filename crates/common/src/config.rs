use anyhow::{Context, Result};
use serde::Deserialize;
use validator::Validate;

// Default constants
pub const DEFAULT_EVICTION_TTL_SECS: u64 = 600;
pub const DEFAULT_NODE_CONCURRENCY: usize = 8;
pub const DEFAULT_GRAPH_FETCH_CONCURRENCY: usize = 4;
pub const DEFAULT_GRAPH_FETCH_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CONFIG_PATH: &str = "config/conflux.yaml";
pub const DEFAULT_SERVICE_NAME: &str = "conflux-runtime";
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
pub const ENV_PREFIX: &str = "CONFLUX";

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    #[validate(nested)]
    pub pool_state: PoolStateSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ExecutionSettings {
    /// Whether plan nodes may attach generated code to an execution.
    #[serde(default = "default_true")]
    pub compile_allowed: bool,
    /// Log SQL with literal values instead of the scrubbed form.
    #[serde(default)]
    pub log_sql_with_params: bool,
    #[serde(default = "default_node_concurrency")]
    #[validate(range(min = 1))]
    pub node_concurrency: usize,
    #[serde(default = "default_graph_fetch_concurrency")]
    #[validate(range(min = 1))]
    pub graph_fetch_concurrency: usize,
    #[serde(default)]
    #[validate(nested)]
    pub graph_fetch: GraphFetchSettings,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            compile_allowed: true,
            log_sql_with_params: false,
            node_concurrency: default_node_concurrency(),
            graph_fetch_concurrency: default_graph_fetch_concurrency(),
            graph_fetch: GraphFetchSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct GraphFetchSettings {
    #[serde(default = "default_graph_fetch_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for GraphFetchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_graph_fetch_batch_size(),
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct PoolStateSettings {
    /// Pool states older than this are evicted; also the housekeeping period.
    #[serde(default = "default_eviction_ttl_secs")]
    #[validate(range(min = 1))]
    pub eviction_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub housekeeper_enabled: bool,
}

impl Default for PoolStateSettings {
    fn default() -> Self {
        Self {
            eviction_ttl_secs: default_eviction_ttl_secs(),
            housekeeper_enabled: true,
        }
    }
}

impl PoolStateSettings {
    pub fn eviction_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.eviction_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialSettings {
    /// Configure providers from the shared rule source instead of their own rules.
    #[serde(default = "default_true")]
    pub use_external_rules: bool,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            use_external_rules: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
            json_logs: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_node_concurrency() -> usize {
    DEFAULT_NODE_CONCURRENCY
}

fn default_graph_fetch_concurrency() -> usize {
    DEFAULT_GRAPH_FETCH_CONCURRENCY
}

fn default_graph_fetch_batch_size() -> usize {
    DEFAULT_GRAPH_FETCH_BATCH_SIZE
}

fn default_eviction_ttl_secs() -> u64 {
    DEFAULT_EVICTION_TTL_SECS
}

fn default_otlp_endpoint() -> String {
    DEFAULT_OTLP_ENDPOINT.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // CONFLUX__POOL_STATE__EVICTION_TTL_SECS maps to pool_state.eviction_ttl_secs
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_app_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_state.eviction_ttl_secs, 600);
        assert!(config.execution.compile_allowed);
        assert!(!config.execution.log_sql_with_params);
    }

    #[test]
    fn test_telemetry_config_validation() {
        let config = TelemetryConfig {
            endpoint: "not_a_url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = AppConfig {
            pool_state: PoolStateSettings {
                eviction_ttl_secs: 0,
                housekeeper_enabled: true,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_file_reads_yaml() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "execution:\n  compile_allowed: false\n  node_concurrency: 2\npool_state:\n  eviction_ttl_secs: 30\n"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(!config.execution.compile_allowed);
        assert_eq!(config.execution.node_concurrency, 2);
        assert_eq!(config.pool_state.eviction_ttl_secs, 30);
        assert_eq!(
            config.execution.graph_fetch.batch_size,
            DEFAULT_GRAPH_FETCH_BATCH_SIZE
        );
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("CONFLUX__POOL_STATE__EVICTION_TTL_SECS", "42");
        let config = AppConfig::from_file("does/not/exist.yaml");
        std::env::remove_var("CONFLUX__POOL_STATE__EVICTION_TTL_SECS");

        let config = config.unwrap();
        assert_eq!(config.pool_state.eviction_ttl_secs, 42);
    }

    #[test]
    #[serial]
    fn test_invalid_file_value_fails_validation() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "execution:\n  node_concurrency: 0\n").unwrap();

        let result = AppConfig::from_file(file.path().to_str().unwrap());
        assert!(result.is_err());
    }
}
