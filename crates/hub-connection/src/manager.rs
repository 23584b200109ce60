//! Connection manager for a single hub endpoint.
//!
//! Owns the one live transport connection, runs the connect / reconnect
//! state machine and broadcasts lifecycle events to the registered
//! listeners. All state changes happen on one task that drains a command
//! queue; transport notifications, timer firings and connect completions
//! are posted to that queue instead of touching state directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use hubrelay_protocol::constants::{RECONNECT_DELAY, STOP_TIMEOUT};
use hubrelay_protocol::{ConnectionState, Endpoint, LifecycleEvent};

use crate::error::HubError;
use crate::reconnection::{FixedDelayPolicy, ReconnectTimer};
use crate::registry::{HubListener, ListenerId, ListenerRegistry};
use crate::transport::{HubConnection, HubTransport, TransportError};

/// Handle to the connection manager of one hub endpoint.
///
/// Cheap to clone. The manager task keeps running until [`stop`](Self::stop)
/// is called or every handle is dropped.
#[derive(Clone)]
pub struct HubConnectionManager {
    shared: Arc<Shared>,
}

/// Non-owning handle to a [`HubConnectionManager`].
#[derive(Clone, Default)]
pub struct WeakHubConnectionManager {
    shared: std::sync::Weak<Shared>,
}

impl WeakHubConnectionManager {
    pub fn upgrade(&self) -> Option<HubConnectionManager> {
        self.shared
            .upgrade()
            .map(|shared| HubConnectionManager { shared })
    }
}

struct Shared {
    endpoint: Endpoint,
    url: String,
    transport: Arc<dyn HubTransport>,
    registry: ListenerRegistry,
    /// Read by the reconnect policy from transport threads, so it lives
    /// outside the manager task.
    shutdown: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    task: std::sync::Mutex<Option<TaskHandle>>,
}

struct TaskHandle {
    commands: mpsc::UnboundedSender<Command>,
    join: JoinHandle<()>,
}

enum Command {
    Connect,
    ReconnectDue {
        seq: u64,
    },
    Started {
        generation: u64,
        result: Result<(), TransportError>,
    },
    Reconnecting {
        generation: u64,
        cause: Option<String>,
    },
    Reconnected {
        generation: u64,
        connection_id: Option<String>,
    },
    Closed {
        generation: u64,
        cause: Option<String>,
    },
    Invoke {
        method: String,
        args: Vec<Value>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

impl HubConnectionManager {
    /// Creates a manager for `endpoint`. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(endpoint: Endpoint, transport: Arc<dyn HubTransport>) -> Self {
        let url = endpoint.connection_url();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                endpoint,
                url,
                transport,
                registry: ListenerRegistry::new(),
                shutdown: Arc::new(AtomicBool::new(false)),
                state_tx: Arc::new(state_tx),
                task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakHubConnectionManager {
        WeakHubConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Connection URL derived from the endpoint.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.shared.registry
    }

    pub fn register(&self, listener: Arc<dyn HubListener>) {
        self.shared.registry.register(listener);
    }

    pub fn unregister(&self, id: ListenerId) {
        self.shared.registry.unregister(id);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every connection state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether the manager task is running.
    pub fn is_running(&self) -> bool {
        self.shared
            .task
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|t| !t.join.is_finished()))
            .unwrap_or(false)
    }

    /// Starts connecting. Idempotent while running; a stopped manager
    /// starts over with a fresh connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let Ok(mut guard) = self.shared.task.lock() else {
            return;
        };
        if guard.as_ref().is_some_and(|t| !t.join.is_finished()) {
            debug!(url = %self.shared.url, "connection manager already running");
            return;
        }

        self.shared.shutdown.store(false, Ordering::Release);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = ManagerTask::new(&self.shared, commands.downgrade(), rx);
        let _ = commands.send(Command::Connect);
        let join = tokio::spawn(task.run());
        *guard = Some(TaskHandle { commands, join });
    }

    /// Stops the manager: no further reconnects, the live connection is
    /// closed (waiting at most [`STOP_TIMEOUT`]) and no lifecycle event is
    /// emitted after this returns.
    pub async fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let task = self.shared.task.lock().ok().and_then(|mut g| g.take());
        let Some(task) = task else {
            return;
        };

        let (done, done_rx) = oneshot::channel();
        if task.commands.send(Command::Stop { done }).is_ok() {
            let _ = done_rx.await;
        }
        drop(task.commands);
        if let Err(e) = task.join.await {
            warn!(url = %self.shared.url, "connection manager task failed: {e}");
        }
    }

    /// Sends an invocation over the live connection without waiting for
    /// the result. Dropped with a warning when not connected.
    pub fn invoke(&self, method: impl Into<String>, args: Vec<Value>) {
        let method = method.into();
        let sent = self.shared.task.lock().ok().is_some_and(|guard| {
            guard.as_ref().is_some_and(|t| {
                t.commands
                    .send(Command::Invoke {
                        method: method.clone(),
                        args,
                    })
                    .is_ok()
            })
        });
        if !sent {
            warn!(url = %self.shared.url, %method, "manager not running, dropping invocation");
        }
    }
}

/// State owned by the manager task.
struct ManagerTask {
    url: String,
    transport: Arc<dyn HubTransport>,
    registry: ListenerRegistry,
    shutdown: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Weak so that dropping every manager handle ends the task.
    commands: mpsc::WeakUnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    connection: Option<Arc<dyn HubConnection>>,
    /// Bumped for every connection object built; notifications carry the
    /// generation they were registered under.
    generation: u64,
    opened: bool,
    connection_id: String,
    timer: ReconnectTimer,
}

fn post(commands: &mpsc::WeakUnboundedSender<Command>, command: Command) {
    if let Some(tx) = commands.upgrade() {
        let _ = tx.send(command);
    }
}

impl ManagerTask {
    fn new(
        shared: &Shared,
        commands: mpsc::WeakUnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            url: shared.url.clone(),
            transport: shared.transport.clone(),
            registry: shared.registry.clone(),
            shutdown: shared.shutdown.clone(),
            state_tx: shared.state_tx.clone(),
            commands,
            rx,
            connection: None,
            generation: 0,
            opened: false,
            connection_id: String::new(),
            timer: ReconnectTimer::default(),
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            if let Command::Stop { done } = command {
                self.shutdown_connection().await;
                let _ = done.send(());
                return;
            }
            self.handle(command);
        }

        // Every handle dropped without an explicit stop.
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_connection().await;
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Whether a notification from `generation` concerns the open connection.
    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.opened && !self.is_shutdown()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::ReconnectDue { seq } => {
                if !self.timer.take_due(seq) {
                    trace!(seq, "ignoring stale reconnect timer");
                    return;
                }
                self.connect();
            }
            Command::Started { generation, result } => {
                if generation != self.generation || self.is_shutdown() {
                    trace!(generation, "ignoring superseded connect result");
                    return;
                }
                match result {
                    Ok(()) => self.on_connected(),
                    Err(e) => self.on_connect_failed(&e),
                }
            }
            Command::Reconnecting { generation, cause } => {
                if !self.is_current(generation) {
                    return;
                }
                warn!(
                    connection_id = %self.connection_id,
                    cause = cause.as_deref().unwrap_or("unknown"),
                    "hub connection lost, transport reconnecting"
                );
                self.set_state(ConnectionState::Reconnecting);
                let cause = cause.map(|c| HubError::transport(c).to_string());
                self.registry.broadcast_error(&self.connection_id, cause);
            }
            Command::Reconnected {
                generation,
                connection_id,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                if let Some(id) = connection_id {
                    self.connection_id = id;
                }
                self.set_state(ConnectionState::Connected);
                info!(connection_id = %self.connection_id, "hub connection recovered");
            }
            Command::Closed { generation, cause } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_closed(cause);
            }
            Command::Invoke { method, args } => self.invoke(method, args),
            // Handled in `run`.
            Command::Stop { .. } => {}
        }
    }

    /// Builds a fresh connection object and starts connecting it.
    fn connect(&mut self) {
        self.timer.cancel();
        if self.is_shutdown() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.opened = false;
        self.connection_id.clear();

        let policy = Arc::new(FixedDelayPolicy::new(
            RECONNECT_DELAY,
            self.shutdown.clone(),
        ));
        let connection = self.transport.build(&self.url, policy);
        self.bind_notifications(connection.as_ref(), generation);
        self.connection = Some(connection.clone());
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.url, generation, "connecting to hub");

        let commands = self.commands.clone();
        let start = connection.start();
        tokio::spawn(async move {
            let result = start.await;
            post(&commands, Command::Started { generation, result });
        });
    }

    fn bind_notifications(&self, connection: &dyn HubConnection, generation: u64) {
        let commands = self.commands.clone();
        connection.on_reconnecting(Box::new(move |cause| {
            post(&commands, Command::Reconnecting { generation, cause });
        }));

        let commands = self.commands.clone();
        connection.on_reconnected(Box::new(move |connection_id| {
            post(
                &commands,
                Command::Reconnected {
                    generation,
                    connection_id,
                },
            );
        }));

        let commands = self.commands.clone();
        connection.on_closed(Box::new(move |cause| {
            post(&commands, Command::Closed { generation, cause });
        }));
    }

    fn on_connected(&mut self) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        self.connection_id = match connection.connection_id() {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                debug!(%id, "transport reported no connection id, using local id");
                id
            }
        };
        self.opened = true;
        self.set_state(ConnectionState::Connected);
        info!(url = %self.url, connection_id = %self.connection_id, "connected to hub");

        let event = LifecycleEvent::Opened {
            connection_id: self.connection_id.clone(),
        };
        self.registry.broadcast(&event, Some(connection.as_ref()));
    }

    fn on_connect_failed(&mut self, err: &TransportError) {
        warn!(url = %self.url, error = %err, "hub connection failed");
        self.connection = None;
        self.opened = false;
        self.set_state(ConnectionState::Disconnected);
        self.registry
            .broadcast_error(&self.connection_id, Some(HubError::connect(err).to_string()));
        self.schedule_reconnect();
    }

    fn on_closed(&mut self, cause: Option<String>) {
        info!(
            connection_id = %self.connection_id,
            cause = cause.as_deref().unwrap_or("none"),
            "hub connection closed"
        );
        self.connection = None;
        self.opened = false;
        self.set_state(ConnectionState::Disconnected);

        let event = LifecycleEvent::Closed {
            connection_id: self.connection_id.clone(),
        };
        self.registry.broadcast(&event, None);
        if let Some(cause) = cause {
            self.registry.broadcast_error(
                &self.connection_id,
                Some(HubError::transport(cause).to_string()),
            );
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.is_shutdown() {
            self.timer.cancel();
            return;
        }
        let commands = self.commands.clone();
        let seq = self.timer.schedule(RECONNECT_DELAY, move |seq| {
            post(&commands, Command::ReconnectDue { seq });
        });
        debug!(
            seq,
            delay_ms = RECONNECT_DELAY.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    fn invoke(&self, method: String, args: Vec<Value>) {
        let Some(connection) = self.connection.as_ref().filter(|_| self.opened) else {
            warn!(%method, "not connected to hub, dropping invocation");
            return;
        };
        trace!(%method, args = args.len(), "invoking hub method");
        let send = connection.send(&method, args);
        tokio::spawn(async move {
            // Send failures show up through the connection's own
            // reconnecting / closed notifications.
            if let Err(e) = send.await {
                debug!(%method, error = %e, "hub invocation failed");
            }
        });
    }

    async fn shutdown_connection(&mut self) {
        self.timer.cancel();
        let was_open = self.opened;
        self.opened = false;

        if let Some(connection) = self.connection.take() {
            if tokio::time::timeout(STOP_TIMEOUT, connection.stop())
                .await
                .is_err()
            {
                warn!(url = %self.url, "transport did not stop in time");
            }
        }
        self.set_state(ConnectionState::Disconnected);

        if was_open {
            let event = LifecycleEvent::Closed {
                connection_id: self.connection_id.clone(),
            };
            self.registry.broadcast(&event, None);
        }
        info!(url = %self.url, "hub connection manager stopped");
    }
}
