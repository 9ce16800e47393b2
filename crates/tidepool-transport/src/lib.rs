//! Tidepool Transport
//!
//! Turns a raw TCP byte stream into discrete protocol messages and regulates
//! outbound traffic:
//! - CRLF line framing over an accumulation buffer
//! - one-in-flight flow control (a single unacknowledged request on the wire,
//!   the rest queued FIFO)
//! - `ping`/`pong` heartbeat with forced closure after two missed replies

pub mod connection;
pub mod error;
pub mod events;

pub use connection::{ConnectionHandle, LineConnection, TransportConfig};
pub use error::{Result, TransportError};
pub use events::{EventReceiver, TransportEvent};
