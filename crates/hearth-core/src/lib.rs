//! Hearth Core
//!
//! This crate provides the cache-aside synchronization engine: cache nodes
//! fronting the record store, the registry that flushes them periodically,
//! and the bridge that exchanges sync events with an external process.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod report;

pub use bridge::{SyncBridge, SyncBridgeBuilder, SyncListener, SyncPublisher};
pub use cache::{
    CacheNode, CacheNodeDefinition, CacheNodeDefinitionBuilder, FieldKind, FieldSpec, NodeStats,
    SyncReport, TtlPolicy,
};
pub use config::{CacheSettings, DEFAULT_BRIDGE_CHANNEL};
pub use error::CoreError;
pub use registry::{CacheRegistry, SweepSummary, spawn_sync_task};
pub use report::{CollectingReporter, Report, ReportKind, Reporter, TracingReporter};
