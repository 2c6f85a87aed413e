//! Sync bridge: event exchange with an external process
//!
//! Inbound packets on the bridge channel are fanned out to every cache node
//! and then to the listener registered for the packet type. Delivery is
//! at-most-once in both directions; nothing is acknowledged or replayed.

mod listener;

pub use listener::SyncListener;

use hearth_tier::{CacheTier, SyncPacket};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::registry::CacheRegistry;
use crate::report::{Report, ReportKind, Reporter, TracingReporter};

/// Cloneable handle for publishing packets on the bridge channel
#[derive(Clone)]
pub struct SyncPublisher {
    tier: Arc<dyn CacheTier>,
    channel: String,
}

impl SyncPublisher {
    pub fn new(tier: Arc<dyn CacheTier>, channel: impl Into<String>) -> Self {
        Self {
            tier,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish a packet. Returns false if it was dropped.
    pub async fn send(&self, kind: &str, data: Value) -> bool {
        let sent = hearth_tier::publish(self.tier.as_ref(), &self.channel, kind, data).await;
        if !sent {
            metrics::counter!("hearth_bridge_dropped_total", "type" => kind.to_string())
                .increment(1);
        }
        sent
    }
}

/// Builder for [`SyncBridge`]
pub struct SyncBridgeBuilder<C> {
    channel: String,
    registry: Arc<CacheRegistry>,
    listeners: Vec<Arc<dyn SyncListener<C>>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl<C: Send + Sync + 'static> SyncBridgeBuilder<C> {
    pub fn listener(mut self, listener: impl SyncListener<C> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Build the bridge. A listener whose type is taken replaces the earlier one.
    pub fn build(self) -> SyncBridge<C> {
        let mut listeners: HashMap<String, Arc<dyn SyncListener<C>>> = HashMap::new();
        for listener in self.listeners {
            let kind = listener.event_type().to_string();
            if listeners.insert(kind.clone(), listener).is_some() {
                warn!("Listener for '{}' registered twice, keeping the last one", kind);
            }
        }

        SyncBridge {
            channel: self.channel,
            registry: self.registry,
            listeners,
            reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
            subscription: Mutex::new(None),
        }
    }
}

/// Bridge between the cache nodes and an external process
pub struct SyncBridge<C> {
    channel: String,
    registry: Arc<CacheRegistry>,
    listeners: HashMap<String, Arc<dyn SyncListener<C>>>,
    reporter: Arc<dyn Reporter>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + Sync + 'static> SyncBridge<C> {
    pub fn builder(channel: impl Into<String>, registry: Arc<CacheRegistry>) -> SyncBridgeBuilder<C> {
        SyncBridgeBuilder {
            channel: channel.into(),
            registry,
            listeners: Vec::new(),
            reporter: None,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registered listener types, sorted
    pub fn listener_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.listeners.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn publisher(&self) -> SyncPublisher {
        SyncPublisher::new(self.registry.tier().clone(), self.channel.clone())
    }

    /// Publish a packet for the external process
    pub async fn send_to_external(&self, kind: &str, data: Value) -> bool {
        self.publisher().send(kind, data).await
    }

    pub fn is_listening(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe to the bridge channel and start dispatching packets.
    ///
    /// Packets are handled one at a time, in arrival order.
    pub async fn initialize(self: &Arc<Self>, ctx: Arc<C>) -> Result<(), CoreError> {
        if self.subscription.lock().is_some() {
            self.reporter.report(Report::new(
                ReportKind::Conflict,
                "bridge.initialize",
                "Sync bridge is already initialized",
            ));
            return Ok(());
        }

        let bridge = Arc::clone(self);
        let tier = self.registry.tier().clone();
        let handle = hearth_tier::subscribe(tier.as_ref(), &self.channel, move |packet| {
            let bridge = Arc::clone(&bridge);
            let ctx = Arc::clone(&ctx);
            async move {
                bridge.dispatch(&ctx, packet).await;
            }
        })
        .await
        .map_err(|e| {
            self.reporter.report(
                Report::new(
                    ReportKind::Initialization,
                    "bridge.initialize",
                    format!("Failed to subscribe to '{}'", self.channel),
                )
                .with_cause(&e),
            );
            CoreError::from(e)
        })?;

        *self.subscription.lock() = Some(handle);
        info!(
            "Sync bridge listening on '{}' ({} listeners)",
            self.channel,
            self.listeners.len()
        );
        Ok(())
    }

    /// Fan one packet out to every node, then to its listener.
    ///
    /// Returns the number of nodes that applied the event.
    pub async fn dispatch(&self, ctx: &C, packet: SyncPacket) -> usize {
        metrics::counter!("hearth_bridge_packets_total", "type" => packet.kind.clone())
            .increment(1);
        debug!("Dispatching '{}' packet", packet.kind);

        let mut applied = 0;
        for node in self.registry.nodes() {
            if node.handle_sync_event(&packet.kind, &packet.data).await {
                applied += 1;
            }
        }

        if let Some(listener) = self.listeners.get(&packet.kind)
            && let Err(e) = listener.execute(ctx, &packet.data).await
        {
            self.reporter
                .report(Report::from_error(format!("listener.{}", packet.kind), &e));
        }

        applied
    }

    /// Stop listening on the bridge channel
    pub fn shutdown(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            handle.abort();
            info!("Sync bridge on '{}' stopped", self.channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheNode, CacheNodeDefinition};
    use crate::config::CacheSettings;
    use crate::report::CollectingReporter;
    use async_trait::async_trait;
    use hearth_db::Database;
    use hearth_tier::MemoryTier;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct AppContext {
        seen: Mutex<Vec<(String, Value)>>,
    }

    struct Recorder(&'static str);

    #[async_trait]
    impl SyncListener<AppContext> for Recorder {
        fn event_type(&self) -> &str {
            "announce"
        }

        async fn execute(&self, ctx: &AppContext, data: &Value) -> Result<(), CoreError> {
            ctx.seen.lock().push((self.0.to_string(), data.clone()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl SyncListener<AppContext> for Failing {
        fn event_type(&self) -> &str {
            "explode"
        }

        async fn execute(&self, _ctx: &AppContext, _data: &Value) -> Result<(), CoreError> {
            Err(CoreError::Listener("boom".to_string()))
        }
    }

    async fn registry(tier: Arc<MemoryTier>) -> Arc<CacheRegistry> {
        let db = Database::in_memory().await.unwrap();
        let registry = Arc::new(CacheRegistry::new(tier.clone(), CacheSettings::default()));

        for (name, field, event) in [
            ("profile", "coins", "coins_update"),
            ("stats", "level", "level_update"),
        ] {
            let definition = CacheNodeDefinition::builder(name)
                .field(field)
                .sync_event(event)
                .build()
                .unwrap();
            registry.register_cache_node(CacheNode::new(
                definition,
                tier.clone(),
                Arc::new(db.model(name)),
            ));
        }

        registry.initialize().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_fan_out_is_scoped_by_event_type() {
        let tier = Arc::new(MemoryTier::new());
        let registry = registry(tier.clone()).await;
        let bridge = SyncBridge::<AppContext>::builder("bridge", registry.clone()).build();
        let ctx = AppContext::default();

        let applied = bridge
            .dispatch(
                &ctx,
                SyncPacket::new("coins_update", json!({"uuid": "u1", "coins": 9, "level": 4})),
            )
            .await;
        assert_eq!(applied, 1);

        let profile = tier.hash_get_all("cache:profile:u1").await.unwrap();
        assert_eq!(profile["coins"], "9");
        assert!(tier.hash_get_all("cache:stats:u1").await.unwrap().is_empty());

        let applied = bridge
            .dispatch(&ctx, SyncPacket::new("unrelated", json!({"uuid": "u1", "coins": 1})))
            .await;
        assert_eq!(applied, 0);
        assert_eq!(tier.hash_get_all("cache:profile:u1").await.unwrap()["coins"], "9");
    }

    #[tokio::test]
    async fn test_last_listener_wins_and_failures_are_reported() {
        let tier = Arc::new(MemoryTier::new());
        let registry = registry(tier).await;
        let reporter = Arc::new(CollectingReporter::new());
        let bridge = SyncBridge::builder("bridge", registry)
            .listener(Recorder("first"))
            .listener(Recorder("second"))
            .listener(Failing)
            .reporter(reporter.clone())
            .build();
        assert_eq!(bridge.listener_types(), vec!["announce", "explode"]);

        let ctx = AppContext::default();
        bridge
            .dispatch(&ctx, SyncPacket::new("announce", json!({"text": "hi"})))
            .await;
        bridge.dispatch(&ctx, SyncPacket::new("explode", json!({}))).await;

        let seen = ctx.seen.lock().clone();
        assert_eq!(seen, vec![("second".to_string(), json!({"text": "hi"}))]);
        assert_eq!(reporter.count(ReportKind::Operation), 1);
    }

    #[tokio::test]
    async fn test_packets_flow_through_the_channel() {
        let tier = Arc::new(MemoryTier::new());
        let registry = registry(tier.clone()).await;
        let bridge = Arc::new(
            SyncBridge::builder("bridge", registry)
                .listener(Recorder("only"))
                .build(),
        );
        let ctx = Arc::new(AppContext::default());

        bridge.initialize(ctx.clone()).await.unwrap();
        assert!(bridge.is_listening());

        tier.publish("bridge", "not a packet").await.unwrap();
        let publisher = bridge.publisher();
        assert!(publisher.send("level_update", json!({"discordId": 77, "level": 3})).await);
        assert!(bridge.send_to_external("announce", json!({"n": 1})).await);

        let mut delivered = false;
        for _ in 0..50 {
            if !ctx.seen.lock().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered, "listener never received the packet");

        // Packets are handled in order, so the earlier event already landed
        assert_eq!(tier.hash_get_all("cache:stats:77").await.unwrap()["level"], "3");

        bridge.shutdown();
        assert!(!bridge.is_listening());
    }

    #[tokio::test]
    async fn test_publisher_drops_when_not_ready() {
        let tier = Arc::new(MemoryTier::new());
        let registry = Arc::new(CacheRegistry::new(tier, CacheSettings::default()));
        let bridge = SyncBridge::<AppContext>::builder("bridge", registry).build();
        assert!(!bridge.send_to_external("announce", json!({})).await);
    }
}
