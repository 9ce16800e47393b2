//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected")]
    Disconnected,

    /// The peer replied with a non-success status
    #[error("command failed with status {0}")]
    Command(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    #[error("protocol error: {0}")]
    Protocol(#[from] tidepool_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tidepool_transport::TransportError),
}
