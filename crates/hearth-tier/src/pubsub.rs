//! Packet-level publish/subscribe over a cache tier
//!
//! Delivery is at-most-once: packets published while the tier is not ready,
//! or while no subscriber is bound, are dropped without error.

use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::CacheTier;
use crate::error::TierError;
use crate::packet::SyncPacket;

/// Publish a `{type, data}` packet on `channel`.
///
/// Returns whether the packet was handed to the bus. A tier that is not
/// ready drops the packet silently.
pub async fn publish(tier: &dyn CacheTier, channel: &str, kind: &str, data: Value) -> bool {
    if !tier.is_ready() {
        debug!("Cache tier not ready, dropping '{}' packet for '{}'", kind, channel);
        return false;
    }

    let payload = match SyncPacket::new(kind, data).encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode '{}' packet: {}", kind, e);
            return false;
        }
    };

    match tier.publish(channel, &payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to publish '{}' packet on '{}': {}", kind, channel, e);
            false
        }
    }
}

/// Bind the tier's subscription connection to `channel` and invoke
/// `callback` for every decoded packet.
///
/// Malformed payloads are logged and dropped; they never reach the callback
/// and never end the listener loop.
pub async fn subscribe<F, Fut>(
    tier: &dyn CacheTier,
    channel: &str,
    mut callback: F,
) -> Result<JoinHandle<()>, TierError>
where
    F: FnMut(SyncPacket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut stream = tier.subscribe(channel).await?;
    let channel = channel.to_string();

    Ok(tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            if message.channel != channel {
                continue;
            }

            match SyncPacket::decode(&message.payload) {
                Ok(packet) => callback(packet).await,
                Err(e) => warn!("Dropping malformed packet on '{}': {}", channel, e),
            }
        }
        info!("Subscription to '{}' ended", channel);
    }))
}
