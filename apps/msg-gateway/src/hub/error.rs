//! Error taxonomy of the connection hub.
//!
//! Absent sessions and per-session delivery problems are not errors; they
//! show up as omissions and result codes. Only authorization and eviction
//! failures leave the hub as `Err`.

use thiserror::Error;

/// Failure of a single transport operation on one session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("deadline exceeded")]
    Timeout,
    #[error("write failed: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to evict session {conn_id} of user {user_id}: {source}")]
    Eviction {
        conn_id: String,
        user_id: String,
        #[source]
        source: TransportError,
    },
}
