//! Entity manager configuration

use std::time::Duration;

/// Entity lifecycle configuration
#[derive(Debug, Clone)]
pub struct EntityConfig {
    /// Idle time after which an entity is stopped, in milliseconds
    pub max_idle_time_millis: u64,

    /// How long a shard handover waits for entities to finish, in
    /// milliseconds
    pub termination_timeout_millis: u64,

    /// Delay before retrying a send that raced an entity restart, in
    /// milliseconds
    pub send_retry_interval_millis: u64,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            max_idle_time_millis: 60_000,
            termination_timeout_millis: 3000,
            send_retry_interval_millis: 100,
        }
    }
}

impl EntityConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_idle_time_millis: env_parse(
                "SHARDCAST_ENTITY_MAX_IDLE_MS",
                defaults.max_idle_time_millis,
            ),
            termination_timeout_millis: env_parse(
                "SHARDCAST_ENTITY_TERMINATION_TIMEOUT_MS",
                defaults.termination_timeout_millis,
            ),
            send_retry_interval_millis: env_parse(
                "SHARDCAST_ENTITY_SEND_RETRY_MS",
                defaults.send_retry_interval_millis,
            ),
        }
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_millis)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_millis)
    }

    pub fn send_retry_interval(&self) -> Duration {
        Duration::from_millis(self.send_retry_interval_millis)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
