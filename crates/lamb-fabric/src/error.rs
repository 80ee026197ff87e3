use std::time::Duration;

/// Errors that can occur in the rendezvous fabric.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] lamb_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] lamb_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A hello carried a client id below 1.
    #[error("invalid client id {0} (must be >= 1)")]
    InvalidIdentity(i64),

    /// A hello carried a client type with no lane.
    #[error("unknown client type {0}")]
    UnknownClientType(i32),

    /// The broker could not prepare a session endpoint in time.
    #[error("session allocation timed out")]
    AllocationTimeout,

    /// A record body does not fit the fixed record size.
    #[error("record body must be {expected} bytes, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    /// The peer sent something that does not fit the exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No reply arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FabricError>;
