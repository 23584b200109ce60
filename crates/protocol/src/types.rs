use serde::{Deserialize, Serialize};

/// State of a manager's hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected to the hub.
    Connected,
    /// The transport lost the connection and is retrying on its own.
    Reconnecting,
}

/// Lifecycle notification broadcast by a connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A fresh connection was established.
    Opened { connection_id: String },
    /// A connection attempt failed or the live connection reported a failure.
    ///
    /// `connection_id` is empty when no connection was ever established.
    Error {
        connection_id: String,
        cause: Option<String>,
    },
    /// The connection closed and will not recover on its own.
    Closed { connection_id: String },
}

impl LifecycleEvent {
    /// Connection id the event refers to.
    pub fn connection_id(&self) -> &str {
        match self {
            Self::Opened { connection_id }
            | Self::Error { connection_id, .. }
            | Self::Closed { connection_id } => connection_id,
        }
    }
}
