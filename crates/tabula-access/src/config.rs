//! Access layer configuration
//!
//! Everything tunable is a field with a default, deserializable from the
//! application's configuration file. Tunnel establishment limits are
//! configuration, not hidden constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the access core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Worker count for bulk row fan-out
    #[serde(default = "default_bulk_workers")]
    pub bulk_workers: usize,
}

fn default_bulk_workers() -> usize {
    2
}

/// Sizing and expiry per cache store. Client handles churn with
/// connection edits; schema metadata changes rarely. The stores are
/// sized independently for that reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Max cached client handles (direct connections)
    pub daos_capacity: u64,
    /// Max cached tunnel entries
    pub tunnels_capacity: u64,
    /// Max entries per schema store (structures, keys, tables)
    pub schema_capacity: u64,
    /// Idle expiry for client handles and tunnels, seconds
    pub handle_idle_secs: u64,
    /// Time-to-live for schema metadata, seconds
    pub schema_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            daos_capacity: 100,
            tunnels_capacity: 100,
            schema_capacity: 500,
            handle_idle_secs: 60 * 60,
            schema_ttl_secs: 30 * 60,
        }
    }
}

impl CacheConfig {
    pub fn handle_idle(&self) -> Duration {
        Duration::from_secs(self.handle_idle_secs)
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }
}

/// SSH tunnel establishment limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// TCP/handshake timeout per attempt, seconds
    pub connect_timeout_secs: u64,
    /// Total establishment attempts
    pub attempts: u32,
    /// Linear backoff step between attempts, milliseconds
    /// (attempt n waits n * step)
    pub backoff_step_ms: u64,
    /// SSH keepalive interval, seconds (0 disables)
    pub keepalive_secs: u32,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            attempts: 3,
            backoff_step_ms: 500,
            keepalive_secs: 30,
        }
    }
}

impl TunnelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Connectivity probe retry policy (linear backoff, capped attempts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub attempts: u32,
    pub backoff_step_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_config() {
        let config: AccessConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bulk_workers, 2);
        assert_eq!(config.cache.daos_capacity, 100);
        assert_eq!(config.tunnel.attempts, 3);
    }

    #[test]
    fn partial_overrides_apply() {
        let config: AccessConfig =
            serde_json::from_str(r#"{"tunnel": {"connect_timeout_secs": 3, "attempts": 5, "backoff_step_ms": 100, "keepalive_secs": 0}}"#)
                .unwrap();
        assert_eq!(config.tunnel.attempts, 5);
        assert_eq!(config.cache.schema_capacity, 500);
    }
}
