//! Scripted in-memory transport for tests.
//!
//! Connections never touch the network. Tests drive them by emitting
//! named events and firing the reconnecting / reconnected / closed
//! notifications the way a real client library would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::reconnection::{ReconnectPolicy, RetryContext, RetryDecision};
use crate::transport::{
    EventHandler, HubConnection, HubTransport, NotificationHandler, TransportError,
};

type SharedEventHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
type SharedNotificationHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Transport that hands out [`MockConnection`]s and keeps every one built.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    built: Vec<Arc<MockConnection>>,
    start_failures: VecDeque<TransportError>,
    hold_next_start: bool,
    hang_on_stop: bool,
}

/// How a freshly built connection behaves.
#[derive(Default)]
struct Script {
    start_failure: Option<TransportError>,
    hold_start: bool,
    hang_on_stop: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next built connection fail to start with `err`.
    /// Calls queue up, one failure per built connection.
    pub fn fail_next_start(&self, err: TransportError) {
        self.state.lock().unwrap().start_failures.push_back(err);
    }

    /// Keeps the next built connection's start pending until
    /// [`MockConnection::release_start`] is called.
    pub fn hold_next_start(&self) {
        self.state.lock().unwrap().hold_next_start = true;
    }

    /// Makes `stop()` on every connection built from now on never resolve.
    pub fn hang_on_stop(&self) {
        self.state.lock().unwrap().hang_on_stop = true;
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.state.lock().unwrap().built.clone()
    }

    /// Most recently built connection.
    pub fn last(&self) -> Option<Arc<MockConnection>> {
        self.state.lock().unwrap().built.last().cloned()
    }

    pub fn build_count(&self) -> usize {
        self.state.lock().unwrap().built.len()
    }
}

impl HubTransport for MockTransport {
    fn build(&self, url: &str, policy: Arc<dyn ReconnectPolicy>) -> Arc<dyn HubConnection> {
        let mut state = self.state.lock().unwrap();
        let script = Script {
            start_failure: state.start_failures.pop_front(),
            hold_start: std::mem::take(&mut state.hold_next_start),
            hang_on_stop: state.hang_on_stop,
        };
        let conn = Arc::new(MockConnection::new(url, policy, script));
        state.built.push(conn.clone());
        conn
    }
}

/// One scripted connection object.
pub struct MockConnection {
    url: String,
    policy: Arc<dyn ReconnectPolicy>,
    inner: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    start_failure: Option<TransportError>,
    start_gate: Option<oneshot::Receiver<Result<(), TransportError>>>,
    start_release: Option<oneshot::Sender<Result<(), TransportError>>>,
    hang_on_stop: bool,
    connection_id: Option<String>,
    started: bool,
    stopped: bool,
    retries: u32,
    handlers: HashMap<String, Vec<SharedEventHandler>>,
    on_reconnecting: Vec<SharedNotificationHandler>,
    on_reconnected: Vec<SharedNotificationHandler>,
    on_closed: Vec<SharedNotificationHandler>,
    sent: Vec<(String, Vec<Value>)>,
}

impl ConnectionState {
    fn begin(&mut self) -> Result<(), TransportError> {
        match self.start_failure.take() {
            Some(err) => Err(err),
            None => {
                self.started = true;
                self.connection_id = Some(uuid::Uuid::new_v4().to_string());
                Ok(())
            }
        }
    }
}

impl MockConnection {
    fn new(url: &str, policy: Arc<dyn ReconnectPolicy>, script: Script) -> Self {
        let (start_release, start_gate) = if script.hold_start {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Self {
            url: url.to_string(),
            policy,
            inner: Mutex::new(ConnectionState {
                start_failure: script.start_failure,
                start_gate,
                start_release,
                hang_on_stop: script.hang_on_stop,
                ..Default::default()
            }),
        }
    }

    /// Completes a held start. Returns `false` if the start was not held
    /// or nobody is waiting on it anymore.
    pub fn release_start(&self) -> bool {
        let (release, result) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(release) = inner.start_release.take() else {
                return false;
            };
            let result = inner.begin();
            (release, result)
        };
        release.send(result).is_ok()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().started
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }

    /// Number of handlers subscribed to `method`.
    pub fn handler_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .handlers
            .get(method)
            .map_or(0, Vec::len)
    }

    /// Invocations sent so far.
    pub fn sent(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Delivers a named hub event to its handlers. Returns how many ran.
    pub fn emit(&self, method: &str, args: Vec<Value>) -> usize {
        let handlers = self
            .inner
            .lock()
            .unwrap()
            .handlers
            .get(method)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(args.clone());
        }
        handlers.len()
    }

    /// Simulates losing the connection. Asks the reconnect policy what to
    /// do and fires reconnecting (retry) or closed (give up).
    pub fn drop_connection(&self, cause: Option<&str>) -> RetryDecision {
        let ctx = {
            let mut inner = self.inner.lock().unwrap();
            let ctx = RetryContext {
                previous_retry_count: inner.retries,
                retry_reason: cause.map(str::to_string),
                ..Default::default()
            };
            inner.retries += 1;
            ctx
        };
        let decision = self.policy.next_retry(&ctx);
        match decision {
            RetryDecision::RetryAfter(_) => self.fire_reconnecting(cause),
            RetryDecision::GiveUp => self.close(cause),
        }
        decision
    }

    /// Fires the reconnecting notification.
    pub fn fire_reconnecting(&self, cause: Option<&str>) {
        let handlers = self.inner.lock().unwrap().on_reconnecting.clone();
        for handler in &handlers {
            handler(cause.map(str::to_string));
        }
    }

    /// Completes a transport-level reconnect with a new connection id.
    pub fn reconnect(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let handlers = {
            let mut inner = self.inner.lock().unwrap();
            inner.connection_id = Some(id.clone());
            inner.retries = 0;
            inner.on_reconnected.clone()
        };
        for handler in &handlers {
            handler(Some(id.clone()));
        }
        id
    }

    /// Fires the closed notification.
    pub fn close(&self, cause: Option<&str>) {
        let handlers = self.inner.lock().unwrap().on_closed.clone();
        for handler in &handlers {
            handler(cause.map(str::to_string));
        }
    }
}

impl HubConnection for MockConnection {
    fn start(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(gate) = inner.start_gate.take() {
            return async move { gate.await.unwrap_or(Err(TransportError::Closed)) }.boxed();
        }
        futures_util::future::ready(inner.begin()).boxed()
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        let (was_live, hang) = {
            let mut inner = self.inner.lock().unwrap();
            let was_live = inner.started && !inner.stopped;
            inner.stopped = true;
            (was_live, inner.hang_on_stop)
        };
        if hang {
            return futures_util::future::pending().boxed();
        }
        if was_live {
            self.close(None);
        }
        futures_util::future::ready(()).boxed()
    }

    fn connection_id(&self) -> Option<String> {
        self.inner.lock().unwrap().connection_id.clone()
    }

    fn send(&self, method: &str, args: Vec<Value>) -> BoxFuture<'static, Result<(), TransportError>> {
        let mut inner = self.inner.lock().unwrap();
        let result = if inner.started && !inner.stopped {
            inner.sent.push((method.to_string(), args));
            Ok(())
        } else {
            Err(TransportError::Closed)
        };
        futures_util::future::ready(result).boxed()
    }

    fn on(&self, method: &str, handler: EventHandler) {
        self.inner
            .lock()
            .unwrap()
            .handlers
            .entry(method.to_string())
            .or_default()
            .push(Arc::from(handler));
    }

    fn on_reconnecting(&self, handler: NotificationHandler) {
        self.inner
            .lock()
            .unwrap()
            .on_reconnecting
            .push(Arc::from(handler));
    }

    fn on_reconnected(&self, handler: NotificationHandler) {
        self.inner
            .lock()
            .unwrap()
            .on_reconnected
            .push(Arc::from(handler));
    }

    fn on_closed(&self, handler: NotificationHandler) {
        self.inner.lock().unwrap().on_closed.push(Arc::from(handler));
    }
}
