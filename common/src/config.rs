use std::collections::HashMap;

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::backends::Capability;

/// One backend selection: which provider/model a capability resolves to.
#[derive(Clone, Deserialize, Debug)]
pub struct BackendSpec {
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_store_url() -> String {
    "mem://".to_string()
}

fn default_collection() -> String {
    "atlas".to_string()
}

#[derive(Clone, Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ResourceHints {
    pub memory_target_mb: Option<u64>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: HashMap<Capability, BackendSpec>,
    #[serde(default = "StoreConfig::default")]
    pub store: StoreConfig,
    #[serde(default = "LoggingConfig::default")]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resources: ResourceHints,
    #[serde(default = "default_concurrency_min")]
    pub concurrency_min: usize,
    #[serde(default = "default_concurrency_max")]
    pub concurrency_max: usize,
    /// Deadline applied to every network-bound call (store, embedding, LLM, reranker)
    /// via `tokio::time::timeout`.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
}

fn default_concurrency_min() -> usize {
    1
}

fn default_concurrency_max() -> usize {
    8
}

fn default_network_timeout_ms() -> u64 {
    30_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backends: HashMap::new(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            resources: ResourceHints::default(),
            concurrency_min: default_concurrency_min(),
            concurrency_max: default_concurrency_max(),
            network_timeout_ms: default_network_timeout_ms(),
        }
    }
}

impl AppConfig {
    pub fn network_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.network_timeout_ms)
    }
}

/// Load configuration from `./config.{toml,yaml,...}` (if present) layered under
/// environment variables (`QNTM_CONCURRENCY`, `LOG_LEVEL`, ...).
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.store.collection, "atlas");
        assert!(cfg.concurrency_min <= cfg.concurrency_max);
    }
}
