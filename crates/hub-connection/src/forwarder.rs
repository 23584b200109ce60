//! Outbound invocations from a listener to the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error};

use hubrelay_protocol::{LifecycleEvent, NodeStatus};

use crate::error::HubError;
use crate::manager::{HubConnectionManager, WeakHubConnectionManager};
use crate::registry::{HubListener, ListenerId};
use crate::transport::HubConnection;

/// Input message of an outbound node.
///
/// `topic` names the hub method; `payload` holds its positional arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl InvocationRequest {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            payload: Some(payload),
        }
    }
}

/// Validates invocation requests and forwards them to a manager.
pub struct InvocationForwarder {
    id: ListenerId,
    hub: Option<WeakHubConnectionManager>,
    status: watch::Sender<NodeStatus>,
    detached: AtomicBool,
}

impl InvocationForwarder {
    /// Creates a forwarder. With a manager it registers for lifecycle
    /// events to keep its status current; without one, or once the
    /// manager is gone, every forward fails with
    /// [`HubError::UnboundListener`].
    pub fn attach(hub: Option<&HubConnectionManager>) -> Arc<Self> {
        let (status, _) = watch::channel(NodeStatus::default());
        let forwarder = Arc::new(Self {
            id: ListenerId::new(),
            hub: hub.map(HubConnectionManager::downgrade),
            status,
            detached: AtomicBool::new(false),
        });
        if let Some(hub) = hub {
            hub.register(forwarder.clone());
        }
        forwarder
    }

    pub fn is_bound(&self) -> bool {
        self.manager().is_some()
    }

    fn manager(&self) -> Option<HubConnectionManager> {
        if self.detached.load(Ordering::Acquire) {
            return None;
        }
        self.hub.as_ref().and_then(WeakHubConnectionManager::upgrade)
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    /// Forwards an outbound node input message.
    pub fn forward_request(&self, request: &InvocationRequest) -> Result<(), HubError> {
        self.forward(request.topic.as_deref(), request.payload.as_ref())
    }

    /// Validates and forwards `method(arguments...)`.
    ///
    /// Fire-and-forget: `Ok` means the invocation was handed to the
    /// manager, not that the hub received it. Send failures surface as
    /// connection errors instead.
    pub fn forward(&self, method: Option<&str>, arguments: Option<&Value>) -> Result<(), HubError> {
        let result = self.validate(method, arguments);
        match result {
            Ok((hub, method, args)) => {
                debug!(listener = %self.id, %method, args = args.len(), "forwarding invocation");
                hub.invoke(method, args);
                Ok(())
            }
            Err(e) => {
                error!(listener = %self.id, "{e}");
                Err(e)
            }
        }
    }

    fn validate<'a>(
        &self,
        method: Option<&'a str>,
        arguments: Option<&Value>,
    ) -> Result<(HubConnectionManager, &'a str, Vec<Value>), HubError> {
        let hub = self.manager().ok_or(HubError::UnboundListener)?;
        let method = method
            .filter(|m| !m.is_empty())
            .ok_or_else(|| HubError::InvalidInvocation("missing method name (topic)".into()))?;
        let args = match arguments {
            None | Some(Value::Null) => {
                return Err(HubError::InvalidInvocation(
                    "missing argument list (payload)".into(),
                ));
            }
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(HubError::InvalidInvocation(
                    "argument list (payload) must be an array".into(),
                ));
            }
        };
        Ok((hub, method, args))
    }

    /// Shuts the forwarder down for a restart or a removal. On removal it
    /// is unregistered and unbound.
    pub fn close(&self, removed: bool) {
        if removed {
            self.detached.store(true, Ordering::Release);
            if let Some(hub) = self.hub.as_ref().and_then(WeakHubConnectionManager::upgrade) {
                hub.unregister(self.id);
            }
        }
        self.status.send_replace(NodeStatus::default());
    }
}

impl HubListener for InvocationForwarder {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on_lifecycle(&self, event: &LifecycleEvent, _: Option<&dyn HubConnection>) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        self.status.send_replace(NodeStatus::for_event(event));
    }
}
