//! Error types for flow configuration and deployment.

use hubrelay_hub_connection::HubError;
use hubrelay_protocol::EndpointError;

/// Errors produced while loading or deploying a flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid flow configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint for client {id}: {source}")]
    Endpoint {
        id: String,
        #[source]
        source: EndpointError,
    },

    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Hub(#[from] HubError),
}
