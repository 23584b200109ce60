pub mod constants;
pub mod endpoint;
pub mod routed;
pub mod status;
pub mod types;

// Re-export primary types for convenience.
pub use endpoint::{Endpoint, EndpointError, Port};
pub use routed::{OutputSlot, RoutedMessage};
pub use status::{IndicatorColor, IndicatorShape, NodeStatus, StatusEvent};
pub use types::{ConnectionState, LifecycleEvent};
