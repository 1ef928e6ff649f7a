// Error type surfaced by pub/sub operations.
use respmux_transport::TransportError;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, PubSubError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum PubSubError {
    // Returned by every operation once the connection has been torn down.
    #[error("pubsub connection already closed")]
    Closed,
    // A pending command was interrupted by teardown without a known cause.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(Arc<TransportError>),
    #[error("closing connection failed: {0}")]
    CloseFailed(Arc<TransportError>),
}

impl PubSubError {
    /// True for errors that mean the connection is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PubSubError::Rejected(_))
    }
}
