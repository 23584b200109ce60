//! Seam to the hub client library.
//!
//! The wire protocol (handshake, framing, serialization) lives behind
//! these traits. A transport builds connection objects; a connection
//! object connects once, may recover on its own according to the
//! reconnect policy it was built with, and reports what happened through
//! the registered notification handlers.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::reconnection::ReconnectPolicy;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("hub unavailable: {0}")]
    Unavailable(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,
}

/// Handler for a named hub event. Receives the event's arguments.
pub type EventHandler = Box<dyn Fn(Vec<Value>) + Send + Sync>;

/// Handler for transport notifications carrying an optional cause or id.
pub type NotificationHandler = Box<dyn Fn(Option<String>) + Send + Sync>;

/// Factory for hub connection objects.
pub trait HubTransport: Send + Sync + 'static {
    /// Creates an unstarted connection to `url` that consults `policy`
    /// whenever it loses the connection.
    fn build(&self, url: &str, policy: Arc<dyn ReconnectPolicy>) -> Arc<dyn HubConnection>;
}

/// A single hub connection object.
///
/// Named-event handlers are tied to the object: a new object starts with
/// none registered.
pub trait HubConnection: Send + Sync {
    /// Connects to the hub.
    fn start(&self) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Closes the connection. Fires the closed notification.
    fn stop(&self) -> BoxFuture<'static, ()>;

    /// Id assigned by the hub, `None` until connected.
    fn connection_id(&self) -> Option<String>;

    /// Sends an invocation without waiting for a result.
    fn send(&self, method: &str, args: Vec<Value>) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Subscribes to a named hub event.
    fn on(&self, method: &str, handler: EventHandler);

    /// Connection lost; the transport is retrying. Receives the cause.
    fn on_reconnecting(&self, handler: NotificationHandler);

    /// Retry succeeded. Receives the new connection id.
    fn on_reconnected(&self, handler: NotificationHandler);

    /// Connection gone for good. Receives the cause, if any.
    fn on_closed(&self, handler: NotificationHandler);
}
