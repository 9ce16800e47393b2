//! Events emitted by a connection to its owner

use tidepool_core::Envelope;
use tokio::sync::mpsc;

/// Events that can occur on a connection
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// One parsed protocol message arrived
    Message(Envelope),
    /// Connection closed (clean or error); `reason` is `None` for a clean
    /// peer close or a deliberate local close
    Disconnected { reason: Option<String> },
}

/// Receiving half of a connection's event stream
pub type EventReceiver = mpsc::Receiver<TransportEvent>;
