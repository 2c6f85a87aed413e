//! Dual-lifetime expiry policy

use serde::{Deserialize, Serialize};

use crate::config::CacheSettings;

/// Entry lifetimes of a cache node, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Lifetime of an entry whose entity is idle
    pub ttl: u64,
    /// Lifetime of an entry whose entity is active, and of its access marker
    pub active_ttl: u64,
    /// An entity accessed less than this many seconds ago is active
    pub inactive_threshold: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for TtlPolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl_secs,
            active_ttl: settings.active_ttl_secs,
            inactive_threshold: settings.inactive_threshold_secs,
        }
    }
}

impl TtlPolicy {
    pub fn expiry_for(&self, active: bool) -> u64 {
        if active { self.active_ttl } else { self.ttl }
    }

    /// Derive activity from the last access time (unix millis)
    pub fn is_active(&self, last_access: Option<i64>, now: i64) -> bool {
        match last_access {
            Some(at) => now.saturating_sub(at) < self.inactive_threshold as i64 * 1000,
            None => false,
        }
    }
}
