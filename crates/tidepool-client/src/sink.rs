//! Event sink trait
//!
//! Applications observe a controller by implementing [`EventSink`] and
//! overriding the hooks they care about; every method has a no-op (or
//! log-only) default.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tidepool_core::DeviceObject;
use tracing::info;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// The controller completed its first successful start
    async fn started(&self) {}

    /// The controller came back after a connection loss
    async fn reconnected(&self) {}

    /// The connection was lost; `reason` is `None` for a clean close
    async fn disconnected(&self, reason: Option<String>) {
        let _ = reason;
    }

    /// Tracked objects changed state; each entry is a post-update snapshot
    async fn updated(&self, changed: Vec<DeviceObject>) {
        let _ = changed;
    }

    /// An unsolicited query result arrived
    async fn query_result(&self, query_name: String, answer: Option<Value>) {
        let _ = (query_name, answer);
    }

    /// A reconnect attempt is scheduled after `delay`
    async fn retrying(&self, delay: Duration) {
        info!("will attempt to reconnect in {}s", delay.as_secs());
    }
}

/// Sink that ignores everything; useful for one-shot commands
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {}
