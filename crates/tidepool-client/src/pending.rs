//! Correlation table for in-flight requests
//!
//! Every outbound request registers its `messageID` here before it is
//! handed to the transport. Inbound replies are matched by id; anything
//! that does not match a registered id is treated as a notification and
//! handed back to the dispatcher.

use dashmap::DashMap;
use tidepool_core::Envelope;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// What to do with the reply to a registered request
pub(crate) enum Pending {
    /// Nobody is waiting; the reply is logged and dropped
    FireAndForget,
    /// A caller is blocked on the reply
    Awaiting(oneshot::Sender<Result<Envelope>>),
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: DashMap<String, Pending>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request whose reply a caller will await
    pub(crate) fn register_waiting(&self, id: &str) -> oneshot::Receiver<Result<Envelope>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id.to_string(), Pending::Awaiting(tx));
        rx
    }

    /// Register a request whose reply should be swallowed
    pub(crate) fn register_fire_and_forget(&self, id: &str) {
        self.entries.insert(id.to_string(), Pending::FireAndForget);
    }

    /// Drop a registration (send failure, timeout)
    pub(crate) fn remove(&self, id: &str) {
        self.entries.remove(id);
    }

    /// Correlate one inbound envelope against the table.
    ///
    /// Returns the envelope back when it should be dispatched as a
    /// notification. Error replies whose id matches nothing are dropped
    /// here: the peer is known to stamp some error replies with an id
    /// unrelated to any request.
    pub(crate) fn resolve(&self, envelope: Envelope) -> Option<Envelope> {
        match self.entries.remove(&envelope.message_id) {
            Some((id, Pending::Awaiting(tx))) => {
                let result = if envelope.is_success() {
                    Ok(envelope)
                } else {
                    let status = envelope.response.clone().unwrap_or_default();
                    debug!("request {id} failed with status {status}");
                    Err(ClientError::Command(status))
                };
                // the caller may have timed out and dropped the receiver
                let _ = tx.send(result);
                None
            }
            Some((id, Pending::FireAndForget)) => {
                debug!("ignoring response for request {id}");
                None
            }
            None => {
                if envelope.is_notification() || envelope.is_success() {
                    Some(envelope)
                } else {
                    warn!(
                        "dropping uncorrelated error reply (id {}, status {:?})",
                        envelope.message_id, envelope.response
                    );
                    None
                }
            }
        }
    }

    /// Fail every waiter; called when the connection goes away
    pub(crate) fn fail_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, Pending::Awaiting(tx))) = self.entries.remove(&id) {
                let _ = tx.send(Err(ClientError::Disconnected));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
