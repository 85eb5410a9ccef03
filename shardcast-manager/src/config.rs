//! Shard Manager configuration
//!
//! Configuration loaded from environment variables and command line.

use shardcast_core::DEFAULT_NUMBER_OF_SHARDS;
use std::time::Duration;

/// Shard Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Size of the shard id space, fixed for the life of the cluster
    pub number_of_shards: u32,

    /// Interval between periodic background rebalances in seconds
    pub rebalance_interval_secs: u64,

    /// Fraction of the shard space one rebalance round may move to a
    /// single pod (0.0 - 1.0)
    pub rebalance_rate: f64,

    /// Delay before retrying a failed immediate rebalance, in seconds
    pub rebalance_retry_interval_secs: u64,

    /// Timeout for a single pod ping in milliseconds
    pub ping_timeout_millis: u64,

    /// Maximum concurrent pod RPCs within one rebalance round
    pub rpc_concurrency: usize,

    /// Number of retries for failed persistence calls
    pub persist_retry_count: u32,

    /// Delay between persistence retries in milliseconds
    pub persist_retry_interval_millis: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            number_of_shards: DEFAULT_NUMBER_OF_SHARDS,
            rebalance_interval_secs: 20,
            rebalance_rate: 0.02,
            rebalance_retry_interval_secs: 10,
            ping_timeout_millis: 3000,
            rpc_concurrency: 4,
            persist_retry_count: 3,
            persist_retry_interval_millis: 3000,
        }
    }
}

impl ManagerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            number_of_shards: env_parse("SHARDCAST_NUMBER_OF_SHARDS", defaults.number_of_shards),
            rebalance_interval_secs: env_parse(
                "SHARDCAST_REBALANCE_INTERVAL",
                defaults.rebalance_interval_secs,
            ),
            rebalance_rate: env_parse("SHARDCAST_REBALANCE_RATE", defaults.rebalance_rate),
            rebalance_retry_interval_secs: env_parse(
                "SHARDCAST_REBALANCE_RETRY_INTERVAL",
                defaults.rebalance_retry_interval_secs,
            ),
            ping_timeout_millis: env_parse(
                "SHARDCAST_PING_TIMEOUT_MS",
                defaults.ping_timeout_millis,
            ),
            rpc_concurrency: env_parse("SHARDCAST_RPC_CONCURRENCY", defaults.rpc_concurrency),
            persist_retry_count: env_parse(
                "SHARDCAST_PERSIST_RETRIES",
                defaults.persist_retry_count,
            ),
            persist_retry_interval_millis: env_parse(
                "SHARDCAST_PERSIST_RETRY_INTERVAL_MS",
                defaults.persist_retry_interval_millis,
            ),
        }
    }

    /// Get rebalance interval as Duration
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }

    /// Get rebalance retry delay as Duration
    pub fn rebalance_retry_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_retry_interval_secs)
    }

    /// Get ping timeout as Duration
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_millis)
    }

    /// Get persistence retry delay as Duration
    pub fn persist_retry_interval(&self) -> Duration {
        Duration::from_millis(self.persist_retry_interval_millis)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
