//! Tidepool Client
//!
//! High-level async client for pool/spa automation controllers: correlated
//! request/response on top of the flow-controlled transport, a lifecycle
//! that mirrors the peer's object inventory into an in-memory model, and a
//! supervisor that keeps the whole thing connected.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tidepool_client::{ConnectionSupervisor, ControllerConfig, ModelController, NoopSink};
//! use tidepool_core::ObjectModel;
//!
//! # async fn run() {
//! let controller = Arc::new(ModelController::new(
//!     "192.168.1.50",
//!     ObjectModel::new(),
//!     Arc::new(NoopSink),
//!     ControllerConfig::default(),
//! ));
//! let supervisor = ConnectionSupervisor::new(
//!     controller.clone(),
//!     Arc::new(NoopSink),
//!     Duration::from_secs(30),
//! );
//! supervisor.start();
//! # }
//! ```

pub mod controller;
pub mod error;
mod pending;
pub mod sink;
pub mod supervisor;

pub use controller::{BaseController, Controller, ControllerConfig, ModelController};
pub use error::{ClientError, Result};
pub use sink::{EventSink, NoopSink};
pub use supervisor::ConnectionSupervisor;
