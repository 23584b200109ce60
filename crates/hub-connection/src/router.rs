//! Per-listener routing of hub events into output slots.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use hubrelay_protocol::constants::{DATA_SLOT_OFFSET, OUTPUT_CHANNEL_CAPACITY};
use hubrelay_protocol::{LifecycleEvent, NodeStatus, RoutedMessage};

use crate::manager::HubConnectionManager;
use crate::registry::{HubListener, ListenerId, WeakListenerRegistry};
use crate::transport::HubConnection;

/// Binding of a hub event name to a data output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub method_name: String,
    pub output: usize,
}

impl Subscription {
    pub fn new(method_name: impl Into<String>, output: usize) -> Self {
        Self {
            method_name: method_name.into(),
            output,
        }
    }
}

/// Routes a manager's lifecycle events and subscribed hub events into one
/// listener's output channel.
///
/// Every delivered [`RoutedMessage`] has exactly one slot populated.
pub struct EventRouter {
    id: ListenerId,
    subscriptions: Vec<Subscription>,
    width: usize,
    output: mpsc::Sender<RoutedMessage>,
    status: watch::Sender<NodeStatus>,
    /// Incremented on every `Opened`, `Closed` and detach; hub event
    /// handlers only deliver while it still holds the value they captured.
    epoch: Arc<AtomicU64>,
    detached: AtomicBool,
    registry: WeakListenerRegistry,
}

impl EventRouter {
    /// Creates a router for `subscriptions` and registers it with `manager`.
    ///
    /// Returns the router and the receiving end of its output channel.
    pub fn attach(
        manager: &HubConnectionManager,
        subscriptions: Vec<Subscription>,
    ) -> (Arc<Self>, mpsc::Receiver<RoutedMessage>) {
        let (output, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(NodeStatus::default());
        let width = DATA_SLOT_OFFSET
            + subscriptions
                .iter()
                .map(|s| s.output + 1)
                .max()
                .unwrap_or(0)
                .max(subscriptions.len());

        let router = Arc::new(Self {
            id: ListenerId::new(),
            subscriptions,
            width,
            output,
            status,
            epoch: Arc::new(AtomicU64::new(0)),
            detached: AtomicBool::new(false),
            registry: manager.registry().downgrade(),
        });
        manager.register(router.clone());
        (router, rx)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Number of slots in every message this router emits.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    /// Shuts the router down for a restart or a removal.
    ///
    /// The status is cleared either way. On removal (`removed == true`) the
    /// router is also unregistered and stops delivering; on a restart it
    /// stays registered.
    pub fn close(&self, removed: bool) {
        if removed {
            self.detached.store(true, Ordering::Release);
            self.epoch.fetch_add(1, Ordering::AcqRel);
            if let Some(registry) = self.registry.upgrade() {
                registry.unregister(self.id);
            }
            debug!(listener = %self.id, "event router removed");
        }
        self.status.send_replace(NodeStatus::default());
    }

    fn deliver(&self, msg: RoutedMessage) {
        deliver(&self.output, self.id, msg);
    }

    fn subscribe_all(&self, connection: &dyn HubConnection) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        for sub in &self.subscriptions {
            let current = self.epoch.clone();
            let output = self.output.clone();
            let id = self.id;
            let width = self.width;
            let slot = sub.output;
            let method = sub.method_name.clone();

            trace!(listener = %id, %method, slot, "subscribing to hub event");
            connection.on(
                &sub.method_name,
                Box::new(move |args| {
                    if current.load(Ordering::Acquire) != epoch {
                        trace!(listener = %id, %method, "dropping event from stale subscription");
                        return;
                    }
                    let msg = RoutedMessage::data(width, slot, event_payload(args));
                    deliver(&output, id, msg);
                }),
            );
        }
    }
}

fn deliver(output: &mpsc::Sender<RoutedMessage>, id: ListenerId, msg: RoutedMessage) {
    if let Err(e) = output.try_send(msg) {
        warn!(listener = %id, "failed to deliver routed message: {e}");
    }
}

/// Collapses hub event arguments into one payload: the single argument,
/// `null` for none, an array for several. Nothing is dropped for
/// multi-argument events; older in-node flows delivered only the first
/// argument.
fn event_payload(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

impl HubListener for EventRouter {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on_lifecycle(&self, event: &LifecycleEvent, connection: Option<&dyn HubConnection>) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        self.status.send_replace(NodeStatus::for_event(event));

        match event {
            LifecycleEvent::Opened { .. } => {
                if let Some(connection) = connection {
                    self.subscribe_all(connection);
                }
                self.deliver(RoutedMessage::connected(self.width));
            }
            LifecycleEvent::Error { cause, .. } => {
                self.deliver(RoutedMessage::error(self.width, cause.as_deref()));
            }
            LifecycleEvent::Closed { .. } => {
                self.epoch.fetch_add(1, Ordering::AcqRel);
                self.deliver(RoutedMessage::disconnected(self.width));
            }
        }
    }

    /// Drops the live subscriptions. A router registered again resumes on
    /// the next `Opened`.
    fn on_unregistered(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(listener = %self.id, "event router unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hubrelay_protocol::{Endpoint, IndicatorColor, StatusEvent};
    use serde_json::json;

    use crate::mock::MockTransport;

    fn manager() -> (HubConnectionManager, MockTransport) {
        let transport = MockTransport::new();
        let manager = HubConnectionManager::new(
            Endpoint::new("localhost", 80, "hub", false),
            Arc::new(transport.clone()),
        );
        (manager, transport)
    }

    async fn next(rx: &mut mpsc::Receiver<RoutedMessage>) -> RoutedMessage {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for routed message")
            .expect("output channel closed")
    }

    fn subs() -> Vec<Subscription> {
        vec![Subscription::new("m1", 0), Subscription::new("m2", 1)]
    }

    #[tokio::test(start_paused = true)]
    async fn opened_subscribes_and_sends_connected_marker() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();

        let msg = next(&mut rx).await;
        assert_eq!(msg.width(), 5);
        assert_eq!(msg.populated(), Some((0, &json!("Connected"))));

        let conn = transport.last().unwrap();
        assert_eq!(conn.handler_count("m1"), 1);
        assert_eq!(conn.handler_count("m2"), 1);

        let status = router.status();
        assert_eq!(status.indicator_color, Some(IndicatorColor::Green));
        assert_eq!(status.session_id, conn.connection_id());
    }

    #[tokio::test(start_paused = true)]
    async fn event_lands_only_in_its_slot() {
        let (manager, transport) = manager();
        let (_router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        transport.last().unwrap().emit("m2", vec![json!("hello")]);
        let msg = next(&mut rx).await;
        assert_eq!(
            msg.slots(),
            &[None, None, None, None, Some(json!("hello"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_arguments_arrive_as_array() {
        let (manager, transport) = manager();
        let (_router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        let conn = transport.last().unwrap();
        conn.emit("m1", vec![json!("user"), json!("text")]);
        assert_eq!(
            next(&mut rx).await.get(3),
            Some(&json!(["user", "text"]))
        );

        conn.emit("m1", vec![]);
        assert_eq!(next(&mut rx).await.get(3), Some(&Value::Null));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_output_indices_set_width() {
        let (manager, transport) = manager();
        let (router, mut rx) =
            EventRouter::attach(&manager, vec![Subscription::new("late", 4)]);
        assert_eq!(router.width(), 8);
        manager.start();
        next(&mut rx).await;

        transport.last().unwrap().emit("late", vec![json!(1)]);
        assert_eq!(next(&mut rx).await.populated(), Some((7, &json!(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn error_and_close_use_status_slots() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        transport.last().unwrap().close(Some("gone"));

        let closed = next(&mut rx).await;
        assert_eq!(closed.populated(), Some((2, &json!("Disconnected"))));
        let error = next(&mut rx).await;
        assert_eq!(
            error.populated(),
            Some((1, &json!("transport error: gone")))
        );
        assert_eq!(router.status().event_tag, Some(StatusEvent::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cycles_do_not_duplicate_deliveries() {
        let (manager, transport) = manager();
        let (_router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        for _ in 0..3 {
            let old = transport.last().unwrap();
            old.close(None);
            assert_eq!(next(&mut rx).await.populated().unwrap().0, 2);
            assert_eq!(next(&mut rx).await.populated().unwrap().0, 0);

            // Handlers left on the old object must not deliver.
            old.emit("m1", vec![json!("stale")]);
        }

        let conn = transport.last().unwrap();
        assert_eq!(conn.handler_count("m1"), 1);
        conn.emit("m1", vec![json!("fresh")]);

        let msg = next(&mut rx).await;
        assert_eq!(msg.get(3), Some(&json!("fresh")));
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.build_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_router_receives_nothing_further() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        router.close(true);
        assert!(router.status().is_cleared());
        assert!(!manager.registry().contains(router.id()));

        let conn = transport.last().unwrap();
        conn.emit("m1", vec![json!(1)]);
        conn.close(Some("bye"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_router_receives_nothing_further() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        manager.unregister(router.id());
        assert!(!manager.registry().contains(router.id()));

        let conn = transport.last().unwrap();
        conn.emit("m1", vec![json!("after-unregister")]);
        conn.close(Some("bye"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn re_registered_router_resumes_on_next_open() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        manager.unregister(router.id());
        manager.register(router.clone());
        transport.last().unwrap().emit("m1", vec![json!("skipped")]);

        transport.last().unwrap().close(None);
        assert_eq!(next(&mut rx).await.populated().unwrap().0, 2);
        assert_eq!(next(&mut rx).await.populated().unwrap().0, 0);

        transport.last().unwrap().emit("m1", vec![json!("back")]);
        assert_eq!(next(&mut rx).await.get(3), Some(&json!("back")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_without_cause_sends_null_error() {
        let (manager, transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        transport.last().unwrap().fire_reconnecting(None);
        assert_eq!(next(&mut rx).await.populated(), Some((1, &Value::Null)));
        assert_eq!(router.status().event_tag, Some(StatusEvent::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_registration() {
        let (manager, _transport) = manager();
        let (router, mut rx) = EventRouter::attach(&manager, subs());
        manager.start();
        next(&mut rx).await;

        router.close(false);
        assert!(router.status().is_cleared());
        assert!(manager.registry().contains(router.id()));
    }
}
