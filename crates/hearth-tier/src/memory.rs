//! In-process memory tier
//!
//! Implements the full [`CacheTier`] contract inside the process: hashes,
//! string keys, expiry against an injectable [`Clock`], and a broadcast bus
//! for publish/subscribe. Used for single-process deployments and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::backend::{BusMessage, CacheTier, MessageStream, WriteMode, matches_pattern};
use crate::clock::{Clock, SystemClock};
use crate::error::TierError;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<i64>,
}

impl Slot {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Memory-backed cache tier
pub struct MemoryTier {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
    ready: AtomicBool,
    bus: broadcast::Sender<BusMessage>,
}

impl MemoryTier {
    /// Create a memory tier driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a memory tier driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
            bus,
        }
    }

    fn ensure_ready(&self) -> Result<(), TierError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(TierError::NotReady)
        }
    }

    fn deadline(&self, ttl_secs: u64) -> i64 {
        self.clock.now_millis() + (ttl_secs as i64) * 1000
    }

    /// Look up a live slot, dropping it first if it has expired
    fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: i64) -> Option<&'a mut Slot> {
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }

    fn wrong_type(key: &str) -> TierError {
        TierError::WrongType {
            key: key.to_string(),
            reason: "operation against a key holding the wrong kind of value".to_string(),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn connect(&self) -> Result<(), TierError> {
        self.ready.store(true, Ordering::SeqCst);
        info!("Memory cache tier ready");
        Ok(())
    }

    async fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        debug!("Memory cache tier disconnected");
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        match Self::live(&mut slots, key, now) {
            None => Ok(HashMap::new()),
            Some(Slot {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_write(
        &self,
        key: &str,
        fields: &[(String, String)],
        mode: WriteMode,
        ttl_secs: u64,
    ) -> Result<(), TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        if Self::live(&mut slots, key, now).is_none() {
            if fields.is_empty() {
                return Ok(());
            }
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }

        let Some(slot) = slots.get_mut(key) else {
            return Ok(());
        };
        let Value::Hash(hash) = &mut slot.value else {
            return Err(Self::wrong_type(key));
        };

        for (field, value) in fields {
            match mode {
                WriteMode::Overwrite => {
                    hash.insert(field.clone(), value.clone());
                }
                WriteMode::FillMissing => {
                    hash.entry(field.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        if ttl_secs > 0 {
            slot.expires_at = Some(now + (ttl_secs as i64) * 1000);
        }
        Ok(())
    }

    async fn hash_increment(
        &self,
        key: &str,
        field: &str,
        amount: i64,
        ttl_secs: u64,
    ) -> Result<i64, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let deadline = self.deadline(ttl_secs);
        let mut slots = self.slots.lock();

        if Self::live(&mut slots, key, now).is_none() {
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }

        let Some(slot) = slots.get_mut(key) else {
            return Err(Self::wrong_type(key));
        };
        let Value::Hash(hash) = &mut slot.value else {
            return Err(Self::wrong_type(key));
        };

        let current = match hash.get(field) {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| TierError::WrongType {
                key: key.to_string(),
                reason: format!("hash field '{}' is not an integer", field),
            })?,
        };
        let next = current.checked_add(amount).ok_or_else(|| TierError::WrongType {
            key: key.to_string(),
            reason: format!("increment of '{}' would overflow", field),
        })?;

        hash.insert(field.to_string(), next.to_string());
        if ttl_secs > 0 {
            slot.expires_at = Some(deadline);
        }
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        match Self::live(&mut slots, key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), TierError> {
        self.ensure_ready()?;
        let expires_at = (ttl_secs > 0).then(|| self.deadline(ttl_secs));
        self.slots.lock().insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        match Self::live(&mut slots, key, now) {
            Some(slot) => {
                slot.expires_at = Some(now + (ttl_secs as i64) * 1000);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        Ok(Self::live(&mut slots, key, now)
            .and_then(|slot| slot.expires_at)
            .map(|at| ((at - now + 999) / 1000) as u64))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        let mut removed = 0;
        for key in keys {
            if let Some(slot) = slots.remove(key)
                && !slot.is_expired(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_guarded(
        &self,
        keys: &[String],
        guard_key: &str,
        expected: Option<&str>,
    ) -> Result<bool, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        let current = match Self::live(&mut slots, guard_key, now) {
            None => None,
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            Some(_) => return Err(Self::wrong_type(guard_key)),
        };

        if current.as_deref() != expected {
            return Ok(false);
        }

        for key in keys {
            slots.remove(key);
        }
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, TierError> {
        self.ensure_ready()?;
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();

        slots.retain(|_, slot| !slot.is_expired(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|key| matches_pattern(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TierError> {
        self.ensure_ready()?;
        // No receivers is not an error: publish is fire-and-forget
        let _ = self.bus.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TierError> {
        self.ensure_ready()?;
        let channel = channel.to_string();
        let stream = BroadcastStream::new(self.bus.subscribe()).filter_map(move |msg| match msg {
            Ok(message) if message.channel == channel => Some(message),
            Ok(_) => None,
            Err(e) => {
                warn!("Subscriber on '{}' lagged behind: {}", channel, e);
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
