//! Configuration management with validation and defaults
//!
//! One `SettlerConfig` drives every service the daemon builds. Loading from
//! disk and environment overrides live in `common::config`.

use crate::common::types::{PurposeIndex, SettlementMode};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest secret lifetime accepted at construction
pub const MIN_SECRET_TTL: Duration = Duration::from_secs(5);

/// Default secret lifetime
pub const DEFAULT_SECRET_TTL_SECS: u64 = 180;

/// Default maximum block range per event query
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2048;

/// Complete daemon configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SettlerConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// One order watcher per configured purpose index
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

/// Which chain and contract the daemon settles for
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub contract_address: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
        }
    }
}

/// Event mirror polling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest block range a single event query may span
    pub max_block_range: u64,
    /// How often the shared height source polls the chain
    pub poll_interval_ms: u64,
    /// Pause between consecutive windows of one tick, 0 disables
    pub window_pause_ms: u64,
    /// Capacity of the broadcast channel carrying newly mirrored events
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            poll_interval_ms: 4_000,
            window_pause_ms: 0,
            event_channel_capacity: 1_024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretsConfig {
    pub ttl_secs: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SECRET_TTL_SECS,
        }
    }
}

/// Off-chain credit rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Smallest accepted wager, in credits
    pub min_wager: u64,
    pub min_plays_before_withdraw: u64,
    /// Message every ownership proof signs
    pub challenge: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_wager: 1,
            min_plays_before_withdraw: 10,
            challenge: "chipsettle:prove-account-ownership".to_string(),
        }
    }
}

/// Outbound contract calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Bound on reads: heights, totals, event queries
    pub timeout_ms: u64,
    /// Bound on waiting for the receipt of a submitted transaction
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Minimum spacing between two outbound calls, 0 disables
    pub min_request_delay_ms: u64,
    /// Upper bound on concurrent in-flight calls
    pub max_concurrent_requests: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            min_request_delay_ms: 0,
            max_concurrent_requests: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/settler_data".to_string(),
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_filter: "chipsettle=info".to_string(),
        }
    }
}

/// Settlement pipeline for one purpose index
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherConfig {
    pub purpose_index: PurposeIndex,
    #[serde(default)]
    pub mode: SettlementMode,
}

impl SettlerConfig {
    /// Configuration for local runs against the in-memory chain
    pub fn development() -> Self {
        Self {
            sync: SyncConfig {
                poll_interval_ms: 500,
                ..Default::default()
            },
            secrets: SecretsConfig { ttl_secs: 30 },
            ledger: LedgerConfig {
                min_plays_before_withdraw: 1,
                ..Default::default()
            },
            storage: StorageConfig {
                data_directory: "./DB/settler_dev".to_string(),
                clear_on_start: true,
            },
            monitoring: MonitoringConfig {
                log_filter: "chipsettle=debug".to_string(),
                ..Default::default()
            },
            watchers: vec![WatcherConfig {
                purpose_index: 0,
                mode: SettlementMode::ApiSecure,
            }],
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chain.contract_address.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "chain.contract_address".to_string(),
            ));
        }

        if self.sync.max_block_range == 0 {
            return Err(invalid("sync.max_block_range", "must be > 0"));
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(invalid("sync.poll_interval_ms", "must be > 0"));
        }

        if self.sync.event_channel_capacity == 0 {
            return Err(invalid("sync.event_channel_capacity", "must be > 0"));
        }

        if self.secret_ttl() < MIN_SECRET_TTL {
            return Err(invalid(
                "secrets.ttl_secs",
                &format!("must be at least {}s", MIN_SECRET_TTL.as_secs()),
            ));
        }

        if self.ledger.min_wager == 0 {
            return Err(invalid("ledger.min_wager", "must be > 0"));
        }

        if self.ledger.challenge.is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "ledger.challenge".to_string(),
            ));
        }

        if self.rpc.timeout_ms == 0 {
            return Err(invalid("rpc.timeout_ms", "must be > 0"));
        }

        if self.rpc.confirmation_timeout_ms < self.rpc.timeout_ms {
            return Err(invalid(
                "rpc.confirmation_timeout_ms",
                "must be >= rpc.timeout_ms",
            ));
        }

        if self.rpc.max_concurrent_requests == 0 {
            return Err(invalid("rpc.max_concurrent_requests", "must be > 0"));
        }

        if self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "storage.data_directory".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for watcher in &self.watchers {
            if !seen.insert(watcher.purpose_index) {
                return Err(invalid(
                    "watchers",
                    &format!("purpose index {} configured twice", watcher.purpose_index),
                ));
            }
        }

        Ok(())
    }

    pub fn secret_ttl(&self) -> Duration {
        Duration::from_secs(self.secrets.ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    pub fn window_pause(&self) -> Option<Duration> {
        (self.sync.window_pause_ms > 0).then(|| Duration::from_millis(self.sync.window_pause_ms))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.confirmation_timeout_ms)
    }

    pub fn min_request_delay(&self) -> Duration {
        Duration::from_millis(self.rpc.min_request_delay_ms)
    }
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn invalid(field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
