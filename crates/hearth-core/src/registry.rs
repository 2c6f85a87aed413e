//! Cache registry: owns the nodes and the periodic flush sweep

use hearth_tier::CacheTier;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheNode;
use crate::config::CacheSettings;
use crate::error::CoreError;
use crate::report::{Report, ReportKind, Reporter, TracingReporter};

/// Totals of one sweep over every node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub nodes: u64,
    pub entries: u64,
    pub changed: u64,
    pub evicted: u64,
    pub errors: u64,
}

/// Registry of cache nodes sharing one cache tier
pub struct CacheRegistry {
    tier: Arc<dyn CacheTier>,
    settings: CacheSettings,
    reporter: Arc<dyn Reporter>,
    nodes: RwLock<BTreeMap<String, Arc<CacheNode>>>,
    initialized: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheRegistry {
    /// Create a new registry
    pub fn new(tier: Arc<dyn CacheTier>, settings: CacheSettings) -> Self {
        Self {
            tier,
            settings,
            reporter: Arc::new(TracingReporter),
            nodes: RwLock::new(BTreeMap::new()),
            initialized: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn tier(&self) -> &Arc<dyn CacheTier> {
        &self.tier
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Register a node under its name. A taken name is reported and ignored.
    pub fn register_cache_node(&self, node: impl Into<Arc<CacheNode>>) -> bool {
        let node = node.into();
        let mut nodes = self.nodes.write();

        if nodes.contains_key(node.name()) {
            self.reporter.report(Report::new(
                ReportKind::Conflict,
                "registry.register_cache_node",
                format!("Cache node '{}' is already registered", node.name()),
            ));
            return false;
        }

        info!("Registered cache node '{}'", node.name());
        nodes.insert(node.name().to_string(), node);
        true
    }

    /// Look up a node by name; a missing node is reported
    pub fn get_cache_node(&self, name: &str) -> Option<Arc<CacheNode>> {
        let node = self.nodes.read().get(name).cloned();
        if node.is_none() {
            self.reporter.report(Report::new(
                ReportKind::NotFound,
                "registry.get_cache_node",
                format!("Cache node '{}' is not registered", name),
            ));
        }
        node
    }

    /// All registered nodes, ordered by name
    pub fn nodes(&self) -> Vec<Arc<CacheNode>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && self.tier.is_ready()
    }

    /// Connect the cache tier and start the periodic flush sweep.
    ///
    /// A connect failure is returned since nothing can work without the tier.
    /// Calling this again after success is reported and does nothing.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), CoreError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            self.reporter.report(Report::new(
                ReportKind::Conflict,
                "registry.initialize",
                "Cache registry is already initialized",
            ));
            return Ok(());
        }

        if let Err(e) = self.tier.connect().await {
            self.initialized.store(false, Ordering::SeqCst);
            self.reporter.report(
                Report::new(
                    ReportKind::Initialization,
                    "registry.initialize",
                    "Failed to connect the cache tier",
                )
                .with_cause(&e),
            );
            return Err(e.into());
        }

        let handle = spawn_sync_task(Arc::downgrade(self), self.settings.sync_interval_secs);
        *self.sweeper.lock() = Some(handle);

        info!(
            "Cache registry initialized with {} nodes (sync every {}s)",
            self.node_count(),
            self.settings.sync_interval_secs
        );
        Ok(())
    }

    /// Flush every node once, one after the other.
    ///
    /// Each node runs in its own task so a panicking node is counted as an
    /// error without stopping the others.
    pub async fn sync_all(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for node in self.nodes() {
            let name = node.name().to_string();
            summary.nodes += 1;

            match tokio::spawn(async move { node.sync_to_database().await }).await {
                Ok(report) => {
                    summary.entries += report.processed;
                    summary.changed += report.changed();
                    summary.evicted += report.evicted;
                    summary.errors += report.failed;
                }
                Err(e) => {
                    summary.errors += 1;
                    self.reporter.report(
                        Report::new(
                            ReportKind::Sync,
                            format!("registry.sync_all({})", name),
                            "Node sweep aborted",
                        )
                        .with_cause(&e),
                    );
                }
            }
        }

        debug!(
            "Sweep finished: {} nodes, {} entries, {} changed, {} evicted, {} errors",
            summary.nodes, summary.entries, summary.changed, summary.evicted, summary.errors
        );
        summary
    }

    /// Stop the sweep timer, flush every node a final time and disconnect
    pub async fn shutdown(&self) {
        info!("Shutting down cache registry");

        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        if self.tier.is_ready() {
            let summary = self.sync_all().await;
            info!(
                "Final sweep: {} entries flushed, {} errors",
                summary.entries, summary.errors
            );
        } else {
            warn!("Cache tier not ready, skipping final sweep");
        }

        self.tier.disconnect().await;
        self.initialized.store(false, Ordering::SeqCst);
        info!("Cache registry shut down");
    }
}

/// Spawn the periodic flush sweep. The task ends once the registry is dropped.
pub fn spawn_sync_task(registry: Weak<CacheRegistry>, interval_secs: u64) -> JoinHandle<()> {
    use tokio::time::{Duration, interval};

    info!(
        "Starting background sync task (interval: {} seconds)",
        interval_secs
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };

            let summary = registry.sync_all().await;
            if summary.changed > 0 || summary.evicted > 0 || summary.errors > 0 {
                info!(
                    "Scheduled sync: {} entries, {} changed, {} evicted, {} errors",
                    summary.entries, summary.changed, summary.evicted, summary.errors
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheNodeDefinition;
    use crate::report::CollectingReporter;
    use async_trait::async_trait;
    use hearth_db::{Database, DbError, FieldMap, FieldValue, ModelStore, Record, RecordStore};
    use hearth_tier::{ManualClock, MemoryTier};

    /// Store whose writes always fail
    struct BrokenStore(ModelStore);

    #[async_trait]
    impl RecordStore for BrokenStore {
        fn model(&self) -> &str {
            self.0.model()
        }

        async fn find_one(&self, entity_id: &str) -> Result<Option<Record>, DbError> {
            self.0.find_one(entity_id).await
        }

        async fn create(&self, _entity_id: &str, _fields: &FieldMap) -> Result<Record, DbError> {
            Err(DbError::Migration("database is locked".to_string()))
        }

        async fn update(&self, _record: &Record, _changes: &FieldMap) -> Result<Record, DbError> {
            Err(DbError::Migration("database is locked".to_string()))
        }
    }

    struct Harness {
        registry: Arc<CacheRegistry>,
        tier: Arc<MemoryTier>,
        clock: Arc<ManualClock>,
        db: Database,
        reporter: Arc<CollectingReporter>,
    }

    async fn harness() -> Harness {
        let clock = Arc::new(ManualClock::default());
        let tier = Arc::new(MemoryTier::with_clock(clock.clone()));
        let db = Database::in_memory().await.unwrap();
        let reporter = Arc::new(CollectingReporter::new());
        let registry = Arc::new(
            CacheRegistry::new(tier.clone(), CacheSettings::default())
                .with_reporter(reporter.clone()),
        );
        Harness {
            registry,
            tier,
            clock,
            db,
            reporter,
        }
    }

    fn node(h: &Harness, name: &str) -> CacheNode {
        node_with_store(h, name, Arc::new(h.db.model(name)))
    }

    fn node_with_store(h: &Harness, name: &str, store: Arc<dyn RecordStore>) -> CacheNode {
        let definition = CacheNodeDefinition::builder(name)
            .field("coins")
            .ttl(60)
            .active_ttl(300)
            .inactive_threshold(120)
            .default_value("coins", 0)
            .build()
            .unwrap();
        CacheNode::new(definition, h.tier.clone(), store)
            .with_clock(h.clock.clone())
            .with_reporter(h.reporter.clone())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let h = harness().await;
        assert!(h.registry.register_cache_node(node(&h, "profile")));
        assert!(h.registry.register_cache_node(node(&h, "stats")));
        assert!(!h.registry.register_cache_node(node(&h, "profile")));

        assert_eq!(h.registry.node_count(), 2);
        assert_eq!(h.reporter.count(ReportKind::Conflict), 1);
        assert_eq!(
            h.registry.get_cache_node("stats").unwrap().name(),
            "stats"
        );

        assert!(h.registry.get_cache_node("missing").is_none());
        assert_eq!(h.reporter.count(ReportKind::NotFound), 1);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let h = harness().await;
        assert!(!h.registry.is_ready());

        h.registry.initialize().await.unwrap();
        assert!(h.registry.is_ready());

        h.registry.initialize().await.unwrap();
        assert_eq!(h.reporter.count(ReportKind::Conflict), 1);

        h.registry.shutdown().await;
        assert!(!h.registry.is_ready());
        assert!(!h.tier.is_ready());
    }

    #[tokio::test]
    async fn test_sync_all_flushes_every_node() {
        let h = harness().await;
        h.registry.register_cache_node(node(&h, "profile"));
        h.registry.register_cache_node(node(&h, "stats"));
        h.registry.initialize().await.unwrap();

        let profile = h.registry.get_cache_node("profile").unwrap();
        let stats = h.registry.get_cache_node("stats").unwrap();
        profile.get("a").await.unwrap();
        profile.increment("a", "coins", 3).await;
        stats.get("b").await.unwrap();
        stats.increment("b", "coins", 4).await;

        h.clock.advance_secs(200);
        let summary = h.registry.sync_all().await;
        assert_eq!(
            summary,
            SweepSummary {
                nodes: 2,
                entries: 2,
                changed: 2,
                evicted: 2,
                errors: 0,
            }
        );

        let a = h.db.get_record("profile", "a").await.unwrap().unwrap();
        let b = h.db.get_record("stats", "b").await.unwrap().unwrap();
        assert_eq!(a.fields["coins"], FieldValue::Integer(3));
        assert_eq!(b.fields["coins"], FieldValue::Integer(4));
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failing_node() {
        let h = harness().await;
        let broken = Arc::new(BrokenStore(h.db.model("ledger")));
        h.registry
            .register_cache_node(node_with_store(&h, "ledger", broken));
        h.registry.register_cache_node(node(&h, "profile"));
        h.registry.initialize().await.unwrap();

        let ledger = h.registry.get_cache_node("ledger").unwrap();
        let profile = h.registry.get_cache_node("profile").unwrap();
        let coins: FieldMap = [("coins".to_string(), FieldValue::Integer(5))].into();
        assert!(ledger.set("l1", &coins, None).await);
        assert!(ledger.set("l2", &coins, None).await);
        assert!(profile.set("p1", &coins, None).await);

        let summary = h.registry.sync_all().await;
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(h.reporter.count(ReportKind::Sync), 2);

        let p1 = h.db.get_record("profile", "p1").await.unwrap().unwrap();
        assert_eq!(p1.fields["coins"], FieldValue::Integer(5));
        assert_eq!(h.db.count_records("ledger").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_runs_final_sweep() {
        let h = harness().await;
        h.registry.register_cache_node(node(&h, "profile"));
        h.registry.initialize().await.unwrap();

        let profile = h.registry.get_cache_node("profile").unwrap();
        profile.get("a").await.unwrap();
        profile.increment("a", "coins", 8).await;

        h.registry.shutdown().await;

        let a = h.db.get_record("profile", "a").await.unwrap().unwrap();
        assert_eq!(a.fields["coins"], FieldValue::Integer(8));
    }

    #[tokio::test]
    async fn test_sweep_timer_flushes_periodically() {
        let h = harness().await;
        let registry = Arc::new(
            CacheRegistry::new(
                h.tier.clone(),
                CacheSettings {
                    sync_interval_secs: 1,
                    ..Default::default()
                },
            )
            .with_reporter(h.reporter.clone()),
        );
        registry.register_cache_node(node(&h, "profile"));
        registry.initialize().await.unwrap();

        let profile = registry.get_cache_node("profile").unwrap();
        profile.get("a").await.unwrap();
        profile.increment("a", "coins", 2).await;

        let mut flushed = false;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let record = h.db.get_record("profile", "a").await.unwrap().unwrap();
            if record.fields["coins"] == FieldValue::Integer(2) {
                flushed = true;
                break;
            }
        }
        assert!(flushed, "sweep timer never flushed the entry");
        registry.shutdown().await;
    }
}
