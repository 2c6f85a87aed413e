//! Listener plugins for the sync bridge

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// Handler for one inbound event type
///
/// `C` is the application context handed to the bridge at initialization.
#[async_trait]
pub trait SyncListener<C>: Send + Sync {
    /// Event type this listener handles
    fn event_type(&self) -> &str;

    async fn execute(&self, ctx: &C, data: &Value) -> Result<(), CoreError>;
}
