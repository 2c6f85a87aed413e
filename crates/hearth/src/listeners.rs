//! Built-in bridge listeners

use async_trait::async_trait;
use hearth_core::{CacheRegistry, CoreError, SyncListener, SyncPublisher};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Context handed to every listener
pub struct AppContext {
    pub registry: Arc<CacheRegistry>,
    pub publisher: SyncPublisher,
}

/// Answers `ping` with `pong`, echoing the payload
pub struct PingListener;

#[async_trait]
impl SyncListener<AppContext> for PingListener {
    fn event_type(&self) -> &str {
        "ping"
    }

    async fn execute(&self, ctx: &AppContext, data: &Value) -> Result<(), CoreError> {
        debug!(
            "Ping received ({} nodes registered)",
            ctx.registry.node_count()
        );
        if !ctx.publisher.send("pong", data.clone()).await {
            warn!("Pong could not be published on '{}'", ctx.publisher.channel());
        }
        Ok(())
    }
}
