use crate::core::error::FederationError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Engine configuration from `<home>/config.toml`.
///
/// Every field has a default; a missing file yields [`EngineConfig::default`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on repositories synced concurrently.
    pub workers: usize,
    /// Overall ceiling for one local sync pass.
    pub deadline_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub default_timeout_secs: u64,
    pub default_cache_ttl_secs: i64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_body_bytes: u64,
    /// Overall ceiling for syncing every enabled server.
    pub sync_deadline_secs: u64,
    pub workers: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            default_cache_ttl_secs: 3_600,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            max_body_bytes: 10 * 1024 * 1024,
            sync_deadline_secs: 300,
            workers: 4,
        }
    }
}

impl RemoteConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub hotspot_top: usize,
    pub hotspot_min_score: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            hotspot_top: 20,
            hotspot_min_score: 0.3,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, FederationError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FederationError> {
        if self.sync.workers == 0 || self.remote.workers == 0 {
            return Err(FederationError::ConfigError(
                "workers must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.query.hotspot_min_score) {
            return Err(FederationError::ConfigError(format!(
                "query.hotspot_min_score must be within 0..=1, got {}",
                self.query.hotspot_min_score
            )));
        }
        if self.remote.default_cache_ttl_secs <= 0 {
            return Err(FederationError::ConfigError(
                "remote.default_cache_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `<home>/config.toml`. No config file = defaults (not an error).
pub fn load_config(store: &Store) -> Result<EngineConfig, FederationError> {
    let path = store.config_path();
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    EngineConfig::from_toml_str(&content)
}
