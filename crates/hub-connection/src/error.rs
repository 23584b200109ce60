//! Error types for hub connections and the nodes attached to them.

use crate::transport::TransportError;

/// Errors surfaced by the hub connection layer.
///
/// `ConnectFailure` and `TransportError` never reach callers as `Err`:
/// the manager turns them into `Error` lifecycle events (their display
/// text becomes the cause) and schedules a reconnect. The remaining
/// variants are returned synchronously and leave the connection alone.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HubError {
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("listener is not bound to a hub connection")]
    UnboundListener,

    #[error("missing hub configuration: {0}")]
    MissingConfiguration(String),
}

impl HubError {
    pub(crate) fn connect(err: &TransportError) -> Self {
        Self::ConnectFailure(err.to_string())
    }

    pub(crate) fn transport(cause: impl Into<String>) -> Self {
        Self::TransportError(cause.into())
    }
}
