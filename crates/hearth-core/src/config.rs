//! Core tuning shared by the registry, nodes and bridge
//!
//! The binary loads these from the `[cache]` section of its TOML file;
//! node definitions fall back to them when they carry no TTL of their own.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default channel for the sync bridge
pub const DEFAULT_BRIDGE_CHANNEL: &str = "hearth:bridge";

/// Cache tuning settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    /// Base entry lifetime in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Entry lifetime for recently accessed entities
    #[serde(default = "default_active_ttl")]
    pub active_ttl_secs: u64,
    /// Seconds since last access below which an entity is active
    #[serde(default = "default_inactive_threshold")]
    pub inactive_threshold_secs: u64,
    /// Interval between flush sweeps
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Pub/sub channel of the sync bridge
    #[serde(default = "default_bridge_channel")]
    pub bridge_channel: String,
}

fn default_ttl() -> u64 {
    3600
}

fn default_active_ttl() -> u64 {
    7200
}

fn default_inactive_threshold() -> u64 {
    1800
}

fn default_sync_interval() -> u64 {
    300
}

fn default_bridge_channel() -> String {
    DEFAULT_BRIDGE_CHANNEL.to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            active_ttl_secs: default_active_ttl(),
            inactive_threshold_secs: default_inactive_threshold(),
            sync_interval_secs: default_sync_interval(),
            bridge_channel: default_bridge_channel(),
        }
    }
}

impl CacheSettings {
    /// Clamp zero durations and warn about settings that lose data.
    pub fn validate(mut self) -> Self {
        for (name, value) in [
            ("ttl_secs", &mut self.ttl_secs),
            ("active_ttl_secs", &mut self.active_ttl_secs),
            ("inactive_threshold_secs", &mut self.inactive_threshold_secs),
            ("sync_interval_secs", &mut self.sync_interval_secs),
        ] {
            if *value == 0 {
                warn!("cache.{} is 0, using 1 second", name);
                *value = 1;
            }
        }

        if self.sync_interval_secs >= self.active_ttl_secs {
            warn!(
                "cache.sync_interval_secs ({}) >= cache.active_ttl_secs ({}); \
                 cached writes may expire before they are flushed",
                self.sync_interval_secs, self.active_ttl_secs
            );
        }

        if self.bridge_channel.is_empty() {
            warn!("cache.bridge_channel is empty, using {}", DEFAULT_BRIDGE_CHANNEL);
            self.bridge_channel = default_bridge_channel();
        }

        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.ttl_secs, 3600);
        assert_eq!(settings.active_ttl_secs, 7200);
        assert_eq!(settings.inactive_threshold_secs, 1800);
        assert_eq!(settings.sync_interval(), Duration::from_secs(300));
        assert_eq!(settings.bridge_channel, "hearth:bridge");
    }

    #[test]
    fn test_partial_deserialize() {
        let settings: CacheSettings = serde_json::from_str(r#"{"ttl_secs": 60}"#).unwrap();
        assert_eq!(settings.ttl_secs, 60);
        assert_eq!(settings.active_ttl_secs, 7200);
    }

    #[test]
    fn test_validate_clamps_zero() {
        let settings = CacheSettings {
            ttl_secs: 0,
            sync_interval_secs: 0,
            bridge_channel: String::new(),
            ..Default::default()
        }
        .validate();
        assert_eq!(settings.ttl_secs, 1);
        assert_eq!(settings.sync_interval_secs, 1);
        assert_eq!(settings.bridge_channel, DEFAULT_BRIDGE_CHANNEL);
    }
}
