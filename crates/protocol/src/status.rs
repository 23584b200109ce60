//! Status projection shown next to each node.

use serde::Serialize;

use crate::types::LifecycleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorShape {
    Dot,
    Ring,
}

/// Lifecycle transition that produced a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    Connect,
    Error,
    Disconnect,
}

/// Informational status of a node. Not part of the message data contract.
///
/// The default value is the cleared status (nothing shown).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator_color: Option<IndicatorColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<IndicatorShape>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_tag: Option<StatusEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl NodeStatus {
    pub fn connected(connection_id: &str) -> Self {
        Self {
            indicator_color: Some(IndicatorColor::Green),
            shape: Some(IndicatorShape::Dot),
            text: "connected".into(),
            event_tag: Some(StatusEvent::Connect),
            session_id: Some(connection_id.to_string()),
        }
    }

    pub fn error(connection_id: &str) -> Self {
        Self {
            indicator_color: Some(IndicatorColor::Red),
            shape: Some(IndicatorShape::Ring),
            text: "error".into(),
            event_tag: Some(StatusEvent::Error),
            session_id: Some(connection_id.to_string()),
        }
    }

    pub fn disconnected(connection_id: &str) -> Self {
        Self {
            indicator_color: Some(IndicatorColor::Red),
            shape: Some(IndicatorShape::Ring),
            text: "disconnected".into(),
            event_tag: Some(StatusEvent::Disconnect),
            session_id: Some(connection_id.to_string()),
        }
    }

    /// Status matching a lifecycle event.
    pub fn for_event(event: &LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Opened { connection_id } => Self::connected(connection_id),
            LifecycleEvent::Error { connection_id, .. } => Self::error(connection_id),
            LifecycleEvent::Closed { connection_id } => Self::disconnected(connection_id),
        }
    }

    pub fn is_cleared(&self) -> bool {
        *self == Self::default()
    }
}
