//! Configuration loading for the settlement daemon
//!
//! Reads an optional TOML file, applies `CHIPSETTLE_*` environment overrides
//! on top, then validates the result.

use crate::config::{SettlerConfig, WatcherConfig};
use crate::errors::{ConfigurationError, SettleResult};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Read overrides from `{prefix}_*` instead of `CHIPSETTLE_*`
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> SettleResult<SettlerConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            SettlerConfig::default()
        };

        self.apply_env_overrides(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> SettleResult<SettlerConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn var(&self, suffix: &str) -> Option<(String, String)> {
        let prefix = self.env_prefix.as_deref().unwrap_or("CHIPSETTLE");
        let name = format!("{}_{}", prefix, suffix);
        env::var(&name).ok().map(|value| (name, value))
    }

    fn parsed<T: FromStr>(&self, suffix: &str) -> SettleResult<Option<T>> {
        match self.var(suffix) {
            Some((name, value)) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| {
                    ConfigurationError::InvalidValue {
                        field: name,
                        reason: format!("cannot parse {:?}", value),
                    }
                    .into()
                }),
            None => Ok(None),
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut SettlerConfig) -> SettleResult<()> {
        if let Some(chain_id) = self.parsed("CHAIN_ID")? {
            config.chain.chain_id = chain_id;
        }
        if let Some((_, address)) = self.var("CONTRACT_ADDRESS") {
            config.chain.contract_address = address;
        }

        if let Some(timeout) = self.parsed("RPC_TIMEOUT_MS")? {
            config.rpc.timeout_ms = timeout;
        }
        if let Some(timeout) = self.parsed("CONFIRMATION_TIMEOUT_MS")? {
            config.rpc.confirmation_timeout_ms = timeout;
        }

        if let Some(range) = self.parsed("MAX_BLOCK_RANGE")? {
            config.sync.max_block_range = range;
        }
        if let Some(interval) = self.parsed("POLL_INTERVAL_MS")? {
            config.sync.poll_interval_ms = interval;
        }

        if let Some(ttl) = self.parsed("SECRET_TTL_SECS")? {
            config.secrets.ttl_secs = ttl;
        }

        if let Some(min_wager) = self.parsed("MIN_WAGER")? {
            config.ledger.min_wager = min_wager;
        }

        if let Some((_, data_dir)) = self.var("DATA_DIR") {
            config.storage.data_directory = data_dir;
        }

        if let Some((_, filter)) = self.var("LOG_FILTER") {
            config.monitoring.log_filter = filter;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &SettlerConfig, path: &str) -> SettleResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

/// Builder pattern for creating configurations
#[derive(Default)]
pub struct ConfigBuilder {
    config: SettlerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract(mut self, chain_id: u64, address: &str) -> Self {
        self.config.chain.chain_id = chain_id;
        self.config.chain.contract_address = address.to_string();
        self
    }

    pub fn data_directory(mut self, path: &str) -> Self {
        self.config.storage.data_directory = path.to_string();
        self
    }

    pub fn max_block_range(mut self, range: u64) -> Self {
        self.config.sync.max_block_range = range;
        self
    }

    pub fn secret_ttl_secs(mut self, ttl: u64) -> Self {
        self.config.secrets.ttl_secs = ttl;
        self
    }

    pub fn watcher(mut self, watcher: WatcherConfig) -> Self {
        self.config.watchers.push(watcher);
        self
    }

    pub fn build(self) -> SettlerConfig {
        self.config
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> SettleResult<()> {
    ConfigLoader::new().save(&SettlerConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::SettlementMode;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .contract(5, "0xfeed")
            .max_block_range(100)
            .watcher(WatcherConfig {
                purpose_index: 2,
                mode: SettlementMode::TwoStep,
            })
            .build();

        assert_eq!(config.chain.chain_id, 5);
        assert_eq!(config.sync.max_block_range, 100);
        assert_eq!(config.watchers[0].mode, SettlementMode::TwoStep);
    }

    #[test]
    fn test_save_and_load_config() -> SettleResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let saved = ConfigBuilder::new()
            .contract(7, "0xabc")
            .watcher(WatcherConfig {
                purpose_index: 3,
                mode: SettlementMode::OnChainSecure,
            })
            .build();

        let loader = ConfigLoader::new();
        loader.save(&saved, path)?;

        let loaded = ConfigLoader::new()
            .with_path(path)
            .with_env_prefix("CHIPSETTLE_TEST_SAVE_LOAD")
            .load()?;

        assert_eq!(loaded.chain.chain_id, 7);
        assert_eq!(loaded.chain.contract_address, "0xabc");
        assert_eq!(loaded.watchers, saved.watchers);

        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> SettleResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[secrets]\nttl_secs = 60\n\n[[watchers]]\npurpose_index = 1\nmode = \"api_secure\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_path(temp_file.path())
            .with_env_prefix("CHIPSETTLE_TEST_PARTIAL")
            .load()?;

        assert_eq!(config.secrets.ttl_secs, 60);
        assert_eq!(config.sync.max_block_range, 2048);
        assert_eq!(config.watchers[0].mode, SettlementMode::ApiSecure);
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("CHIPSETTLE_TEST_ENV_MAX_BLOCK_RANGE", "500");
        env::set_var("CHIPSETTLE_TEST_ENV_DATA_DIR", "/tmp/settler");
        env::set_var("CHIPSETTLE_TEST_ENV_CONFIRMATION_TIMEOUT_MS", "30000");

        let config = ConfigLoader::new()
            .with_env_prefix("CHIPSETTLE_TEST_ENV")
            .load()
            .unwrap();

        assert_eq!(config.sync.max_block_range, 500);
        assert_eq!(config.storage.data_directory, "/tmp/settler");
        assert_eq!(config.rpc.confirmation_timeout_ms, 30_000);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        env::set_var("CHIPSETTLE_TEST_BAD_SECRET_TTL_SECS", "soon");

        let result = ConfigLoader::new()
            .with_env_prefix("CHIPSETTLE_TEST_BAD")
            .load();

        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_is_validated() {
        env::set_var("CHIPSETTLE_TEST_FLOOR_SECRET_TTL_SECS", "2");

        let result = ConfigLoader::new()
            .with_env_prefix("CHIPSETTLE_TEST_FLOOR")
            .load();

        assert!(result.is_err());
    }
}
