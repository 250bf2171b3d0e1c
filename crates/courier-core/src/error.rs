//! Error types for courier

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for courier operations
pub type Result<T> = std::result::Result<T, CourierError>;

/// Courier error types
#[derive(Debug, Clone, Error)]
pub enum CourierError {
    /// Inbound bytes did not decode into a request or response
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The remote handler failed; `cause` is whatever the peer disclosed
    #[error("Remote error: {cause}")]
    RemoteError { cause: String },

    /// No response arrived before the connection timeout
    #[error("Request {id} timed out after {}ms", elapsed.as_millis())]
    Timeout { id: Uuid, elapsed: Duration },

    /// The listen loop could not continue
    #[error("Listen failure: {0}")]
    ListenFailure(String),

    /// Socket level communication error
    #[error("IPC error: {0}")]
    IpcError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The connection was closed while the operation was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer reported that it could not decode something we sent
    #[error("Peer rejected message: {0}")]
    PeerRejected(String),

    /// A local receptor failed while answering a request
    #[error("Receptor '{method}' failed: {cause}")]
    ReceptorFailed { method: String, cause: String },
}

impl CourierError {
    /// Whether this error means the owning loop should stop and close the
    /// connection, or (for timeouts) that a blocking caller gave up.
    pub fn is_listen_failure(&self) -> bool {
        matches!(
            self,
            CourierError::ListenFailure(_) | CourierError::IpcError(_) | CourierError::Timeout { .. }
        )
    }

    /// Whether this is a per-request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, CourierError::Timeout { .. })
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::IpcError(err.to_string())
    }
}
