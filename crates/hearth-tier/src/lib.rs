//! Hearth Cache Tier
//!
//! This crate provides the key-value cache tier used by Hearth: the
//! [`CacheTier`] abstraction, a Redis-backed connection manager with a
//! dedicated subscription connection, an in-process memory tier, and the
//! `{type, data}` packet envelope carried on the pub/sub bus.

pub mod backend;
pub mod clock;
pub mod connection;
pub mod error;
pub mod memory;
pub mod packet;
pub mod pubsub;

pub use backend::{BusMessage, CacheTier, MessageStream, WriteMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Backoff, RedisTier, RedisTierConfig};
pub use error::TierError;
pub use memory::MemoryTier;
pub use packet::SyncPacket;
pub use pubsub::{publish, subscribe};
