//! Tidepool Core
//!
//! Protocol primitives for pool/spa automation controllers speaking the
//! line-delimited JSON protocol over TCP.
//!
//! This crate provides:
//! - Wire envelope types and command names ([`Request`], [`Envelope`], [`commands`])
//! - The in-memory device object model ([`DeviceObject`], [`ObjectModel`])
//! - Controller identity derived at connect time ([`SystemInfo`])
//! - The flat known-attribute catalog ([`attributes::ALL_KNOWN_ATTRIBUTES`])

pub mod attributes;
pub mod error;
pub mod message;
pub mod model;
pub mod object;
pub mod system;

pub use error::{Error, Result};
pub use message::{commands, notifications, Envelope, ObjectChanges, ObjectParams, ObjectRequest, Request};
pub use model::ObjectModel;
pub use object::DeviceObject;
pub use system::SystemInfo;

/// Default TCP port the controller listens on
pub const DEFAULT_PORT: u16 = 6681;

/// Line terminator for wire frames
pub const LINE_TERMINATOR: &str = "\r\n";

/// Bare liveness request frame (not JSON)
pub const PING: &str = "ping";

/// Bare liveness reply frame (not JSON)
pub const PONG: &str = "pong";

/// Response status indicating success
pub const STATUS_OK: &str = "200";
