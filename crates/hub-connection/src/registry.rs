//! Ordered registry of listeners attached to a connection manager.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use hubrelay_protocol::LifecycleEvent;
use tracing::trace;

use crate::transport::HubConnection;

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receiver of a manager's lifecycle events.
///
/// Called on the manager's task: implementations must return promptly
/// and only enqueue work.
pub trait HubListener: Send + Sync {
    fn id(&self) -> ListenerId;

    /// Handles a lifecycle event. `connection` is the live connection for
    /// `Opened` and `None` otherwise; it must not be retained.
    fn on_lifecycle(&self, event: &LifecycleEvent, connection: Option<&dyn HubConnection>);

    /// Called once the listener has been removed from the registry. Work
    /// the listener started on its own (such as hub event handlers) must
    /// stop delivering from here on.
    fn on_unregistered(&self) {}
}

/// Ordered collection of listeners, shared between a manager and the
/// nodes that attach to it.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<Vec<Arc<dyn HubListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-owning handle, for listeners that need to remove themselves
    /// without keeping the registry alive.
    pub fn downgrade(&self) -> WeakListenerRegistry {
        WeakListenerRegistry {
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Appends a listener. Registering the same listener twice makes it
    /// receive every event twice.
    pub fn register(&self, listener: Arc<dyn HubListener>) {
        if let Ok(mut guard) = self.listeners.write() {
            trace!(listener = %listener.id(), "registering listener");
            guard.push(listener);
        }
    }

    /// Removes every registration of `id` and notifies the listener.
    /// Unknown ids are ignored.
    pub fn unregister(&self, id: ListenerId) {
        let removed = match self.listeners.write() {
            Ok(mut guard) => {
                let before = guard.len();
                let removed = guard.iter().find(|l| l.id() == id).cloned();
                guard.retain(|l| l.id() != id);
                trace!(listener = %id, removed = before - guard.len(), "unregistering listener");
                removed
            }
            Err(_) => None,
        };
        // Outside the lock: the hook may call back into the registry.
        if let Some(listener) = removed {
            listener.on_unregistered();
        }
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners
            .read()
            .map(|guard| guard.iter().any(|l| l.id() == id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current listener list, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn HubListener>> {
        self.listeners
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Delivers `event` to every listener in registration order.
    ///
    /// Iterates a snapshot so listeners may (un)register from inside a
    /// callback. A listener removed during the broadcast is skipped.
    pub fn broadcast(&self, event: &LifecycleEvent, connection: Option<&dyn HubConnection>) {
        for listener in self.snapshot() {
            if !self.contains(listener.id()) {
                continue;
            }
            listener.on_lifecycle(event, connection);
        }
    }

    /// Delivers an `Error` to every listener regardless of its
    /// subscriptions.
    pub fn broadcast_error(&self, connection_id: &str, cause: Option<String>) {
        let event = LifecycleEvent::Error {
            connection_id: connection_id.to_string(),
            cause,
        };
        self.broadcast(&event, None);
    }
}

/// Non-owning counterpart of [`ListenerRegistry`].
#[derive(Clone, Default)]
pub struct WeakListenerRegistry {
    listeners: Weak<RwLock<Vec<Arc<dyn HubListener>>>>,
}

impl WeakListenerRegistry {
    pub fn upgrade(&self) -> Option<ListenerRegistry> {
        self.listeners
            .upgrade()
            .map(|listeners| ListenerRegistry { listeners })
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}
