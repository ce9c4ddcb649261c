use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::domains::DomainInfo;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Domains served by this homeserver. The first entry is the local
    /// federation identity used for the client registry.
    pub server_names: Vec<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub multi_instance: MultiInstanceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

impl AppConfig {
    pub fn local_domain(&self) -> &str {
        self.server_names.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct MultiInstanceConfig {
    pub instance: u32,
    pub total: u32,
}

impl Default for MultiInstanceConfig {
    fn default() -> Self {
        Self {
            instance: 0,
            total: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_lanes")]
    pub room_lanes: usize,
    #[serde(default = "default_lanes")]
    pub user_lanes: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            room_lanes: default_lanes(),
            user_lanes: default_lanes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_get_timeout_ms")]
    pub get_timeout_ms: u64,
    #[serde(default = "default_rebuild_timeout_ms")]
    pub rebuild_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            get_timeout_ms: default_get_timeout_ms(),
            rebuild_timeout_ms: default_rebuild_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub domains: Vec<DomainInfo>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            tls: TlsConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// PEM material for outbound mutual TLS. Paths are read once at startup.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub root_ca_path: Option<String>,
    pub server_cert_path: Option<String>,
    pub server_key_path: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_edu_topic")]
    pub edu_topic: String,
    /// When unset, profile EDUs are only logged.
    pub edu_endpoint: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            edu_topic: default_edu_topic(),
            edu_endpoint: None,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_lanes() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    512
}

fn default_get_timeout_ms() -> u64 {
    3000
}

fn default_rebuild_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_edu_topic() -> String {
    "fedEduUpdate".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_names.is_empty() || self.server_names.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Validation(
                "server_names must contain at least one non-empty domain".into(),
            ));
        }
        if self.multi_instance.total == 0 {
            return Err(ConfigError::Validation(
                "multi_instance.total must be > 0".into(),
            ));
        }
        if self.multi_instance.instance >= self.multi_instance.total {
            return Err(ConfigError::Validation(format!(
                "multi_instance.instance ({}) must be < total ({})",
                self.multi_instance.instance, self.multi_instance.total
            )));
        }
        if self.pipeline.room_lanes == 0 || self.pipeline.user_lanes == 0 {
            return Err(ConfigError::Validation(
                "pipeline lane counts must be > 0".into(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "pipeline.queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any variable matching the key path separated by double underscores
/// (e.g. `MULTI_INSTANCE__INSTANCE`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_apply_for_missing_sections() {
        let cfg = parse("server_names: [\"local.example\"]\n");
        assert_eq!(cfg.local_domain(), "local.example");
        assert_eq!(cfg.pipeline.room_lanes, 64);
        assert_eq!(cfg.pipeline.queue_capacity, 512);
        assert_eq!(cfg.registry.get_timeout(), Duration::from_millis(3000));
        assert_eq!(cfg.registry.rebuild_timeout(), Duration::from_millis(5000));
        assert_eq!(cfg.multi_instance.total, 1);
        assert_eq!(cfg.bus.edu_topic, "fedEduUpdate");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn instance_out_of_range_is_rejected() {
        let cfg = parse(
            "server_names: [\"local.example\"]\nmulti_instance:\n  instance: 2\n  total: 2\n",
        );
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn empty_server_names_are_rejected() {
        let cfg = parse("server_names: [\"\"]\n");
        assert!(cfg.validate().is_err());
    }
}
