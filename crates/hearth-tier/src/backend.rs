//! Cache tier trait

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

use crate::error::TierError;

/// A message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Type alias for a boxed stream of bus messages
pub type MessageStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// How a hash write treats fields that are already present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Set every given field (`HSET`)
    Overwrite,
    /// Set only the fields that do not exist yet (`HSETNX`)
    FillMissing,
}

/// Cache tier trait
///
/// Implementations own the connection(s) to a key-value store. Every
/// multi-step write is submitted as one atomic batch so that readers never
/// observe a half-applied call.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Establish the command and subscription connections
    async fn connect(&self) -> Result<(), TierError>;

    /// Drop both connections and clear readiness
    async fn disconnect(&self);

    /// Whether the command connection is established
    fn is_ready(&self) -> bool;

    /// Read every field of a hash (empty map when the key is absent)
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, TierError>;

    /// Write hash fields and apply an expiry in a single atomic batch.
    /// A `ttl_secs` of zero leaves the current expiry untouched.
    async fn hash_write(
        &self,
        key: &str,
        fields: &[(String, String)],
        mode: WriteMode,
        ttl_secs: u64,
    ) -> Result<(), TierError>;

    /// Atomically add `amount` to an integer hash field and apply an expiry
    async fn hash_increment(
        &self,
        key: &str,
        field: &str,
        amount: i64,
        ttl_secs: u64,
    ) -> Result<i64, TierError>;

    /// Read a plain string value
    async fn get(&self, key: &str) -> Result<Option<String>, TierError>;

    /// Write a plain string value with an expiry
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), TierError>;

    /// Set the expiry of a key; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, TierError>;

    /// Remaining lifetime in seconds, `None` if the key is absent or persistent
    async fn ttl(&self, key: &str) -> Result<Option<u64>, TierError>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, TierError>;

    /// Delete `keys` only if `guard_key` still holds `expected`
    /// (`None` meaning the guard key must still be absent).
    async fn delete_guarded(
        &self,
        keys: &[String],
        guard_key: &str,
        expected: Option<&str>,
    ) -> Result<bool, TierError>;

    /// List keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, TierError>;

    /// Publish a raw payload on a channel
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TierError>;

    /// Bind the subscription connection to a channel
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TierError>;
}

/// Match a key against a Redis-style glob pattern (`*` and `?`)
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = k;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            k = resume;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
