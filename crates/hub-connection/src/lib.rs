//! Hub connection manager and per-listener event routing.
//!
//! Keeps one auto-reconnecting connection per hub endpoint, fans inbound
//! hub events out to registered listeners, and forwards outbound
//! invocations over the same connection.

pub mod error;
pub mod forwarder;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod reconnection;
pub mod registry;
pub mod router;
pub mod transport;

pub use error::HubError;
pub use forwarder::{InvocationForwarder, InvocationRequest};
pub use manager::{HubConnectionManager, WeakHubConnectionManager};
pub use reconnection::{FixedDelayPolicy, ReconnectPolicy, RetryContext, RetryDecision};
pub use registry::{HubListener, ListenerId, ListenerRegistry, WeakListenerRegistry};
pub use router::{EventRouter, Subscription};
pub use transport::{
    EventHandler, HubConnection, HubTransport, NotificationHandler, TransportError,
};
