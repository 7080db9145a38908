//! LayerizerDaemon implementation.
//!
//! Hosts one [`Component`] behind a single inbound queue. Exactly one task
//! drains the queue, so the component sees at most one event or request at
//! a time and needs no locking of its own.
//!
//! Events published by the component's own writes go to a separate
//! unbounded local queue. The loop empties it before taking the next
//! inbound message, so a write and its follow-up events are never split by
//! outside traffic and never dropped for lack of room.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mlo_orch_common::memory::{EventSink, MemorySubscriptionSink};
use mlo_orch_common::{Component, Event, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::LayerizerConfig;
use crate::error::DaemonError;

/// Shortest heartbeat period the loop will run with.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the LayerizerDaemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerizerDaemonConfig {
    /// Inbound queue capacity
    pub queue_depth: usize,
    /// Period of the housekeeping tick
    pub heartbeat_interval: Duration,
}

impl Default for LayerizerDaemonConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl From<&LayerizerConfig> for LayerizerDaemonConfig {
    fn from(config: &LayerizerConfig) -> Self {
        Self {
            queue_depth: config.daemon.queue_depth,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Message accepted by the daemon queue.
#[derive(Debug)]
pub enum Inbound {
    Event(Event),
    /// Request plus the channel its response goes back on.
    Request(Request, oneshot::Sender<Response>),
}

/// Counters kept by the daemon loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub events_handled: u64,
    pub requests_handled: u64,
    pub heartbeats: u64,
}

/// Cloneable sending side of the daemon queue.
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<Inbound>,
    local: mpsc::UnboundedSender<Event>,
}

impl DaemonHandle {
    /// Queues an event, waiting for capacity.
    pub async fn send_event(&self, event: Event) -> Result<(), DaemonError> {
        self.tx
            .send(Inbound::Event(event))
            .await
            .map_err(|_| DaemonError::Closed)
    }

    /// Queues an event without waiting. Used from synchronous publishers,
    /// which may run on the daemon task itself.
    pub fn try_send_event(&self, event: Event) -> Result<(), DaemonError> {
        self.tx.try_send(Inbound::Event(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DaemonError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DaemonError::Closed,
        })
    }

    /// Sends a request and waits for its response.
    pub async fn request(&self, request: Request) -> Result<Response, DaemonError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Inbound::Request(request, reply_tx))
            .await
            .map_err(|_| DaemonError::Closed)?;
        reply_rx.await.map_err(|_| DaemonError::NoReply)
    }

    /// Event sink that forwards the events `subscriber_id` subscribed to.
    ///
    /// Forwarded events go to the local queue, which has no bound. The sink
    /// does not keep the inbound queue open.
    pub fn subscribed_sink(
        &self,
        subscriptions: Arc<MemorySubscriptionSink>,
        subscriber_id: impl Into<String>,
    ) -> EventSink {
        let local = self.local.clone();
        let subscriber_id = subscriber_id.into();
        Arc::new(move |event: Event| {
            if !subscriptions.accepts(&subscriber_id, &event) {
                return;
            }
            if local.send(event).is_err() {
                debug!(subscriber = %subscriber_id, "daemon stopped, discarding event");
            }
        })
    }
}

/// Receiving side of the daemon queue, consumed by [`LayerizerDaemon::with_inbox`].
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Inbound>,
    local_rx: mpsc::UnboundedReceiver<Event>,
}

/// Creates a daemon queue ahead of the component it will feed.
///
/// Collaborators that publish into the daemon must exist before the engine
/// can be built, so the handle comes first.
pub fn channel(queue_depth: usize) -> (DaemonHandle, Inbox) {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let (local, local_rx) = mpsc::unbounded_channel();
    (DaemonHandle { tx, local }, Inbox { rx, local_rx })
}

/// Single-consumer host for one component.
pub struct LayerizerDaemon<C: Component> {
    config: LayerizerDaemonConfig,
    component: C,
    rx: mpsc::Receiver<Inbound>,
    local_rx: mpsc::UnboundedReceiver<Event>,
    stats: DaemonStats,
}

impl<C: Component> LayerizerDaemon<C> {
    /// Creates the daemon and the handle used to feed it.
    pub fn new(config: LayerizerDaemonConfig, component: C) -> (Self, DaemonHandle) {
        let (handle, inbox) = channel(config.queue_depth);
        (Self::with_inbox(config, component, inbox), handle)
    }

    /// Creates the daemon around a queue made by [`channel`].
    ///
    /// A heartbeat interval below [`MIN_HEARTBEAT_INTERVAL`] is raised to it.
    pub fn with_inbox(mut config: LayerizerDaemonConfig, component: C, inbox: Inbox) -> Self {
        if config.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            warn!(
                requested_ms = config.heartbeat_interval.as_millis() as u64,
                "heartbeat interval too short, using {:?}",
                MIN_HEARTBEAT_INTERVAL
            );
            config.heartbeat_interval = MIN_HEARTBEAT_INTERVAL;
        }
        Self {
            config,
            component,
            rx: inbox.rx,
            local_rx: inbox.local_rx,
            stats: DaemonStats::default(),
        }
    }

    pub fn stats(&self) -> &DaemonStats {
        &self.stats
    }

    /// Runs until `shutdown` completes or every handle is dropped, then
    /// returns the component.
    pub async fn run<F>(mut self, shutdown: F) -> C
    where
        F: Future<Output = ()>,
    {
        let component_id = self.component.component_id().to_string();
        info!(component = %component_id, "starting daemon loop");
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "LayerizerDaemon", "event_loop_started")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&component_id)
            .with_details(serde_json::json!({
                "queue_depth": self.config.queue_depth,
                "heartbeat_interval_ms": self.config.heartbeat_interval.as_millis() as u64,
            })));

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(component = %component_id, "shutdown requested");
                    break;
                }
                Some(event) = self.local_rx.recv() => self.dispatch(Inbound::Event(event)),
                message = self.rx.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        info!(component = %component_id, "all handles dropped");
                        break;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "LayerizerDaemon", "event_loop_stopped")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&component_id)
            .with_details(serde_json::json!({
                "events_handled": self.stats.events_handled,
                "requests_handled": self.stats.requests_handled,
            })));
        self.component
    }

    fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Event(event) => {
                self.component.handle_event(event);
                self.stats.events_handled += 1;
            }
            Inbound::Request(request, reply) => {
                let response = self.component.handle_request(&request);
                self.stats.requests_handled += 1;
                if reply.send(response).is_err() {
                    debug!(path = %request.path, "requester went away before the reply");
                }
            }
        }
    }

    fn heartbeat(&mut self) {
        self.stats.heartbeats += 1;
        self.component.on_timer();
        debug!(
            component = %self.component.component_id(),
            events = self.stats.events_handled,
            requests = self.stats.requests_handled,
            pending = self.rx.len(),
            pending_local = self.local_rx.len(),
            "daemon heartbeat"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layerizer::{LayerizerContext, LinkLayerizer, LinkLayerizerConfig, Role};
    use mlo_orch_common::memory::{MemoryNetworkRegistry, MemorySystemManager};
    use mlo_orch_common::{Connection, ConnectionChanged, Status};
    use serde_json::json;

    fn engine() -> LinkLayerizer {
        let context = LayerizerContext::new(
            Arc::new(MemorySystemManager::new()),
            Arc::new(MemoryNetworkRegistry::new()),
            Arc::new(MemorySubscriptionSink::new()),
        );
        LinkLayerizer::new(LinkLayerizerConfig::new("lz"), context)
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (daemon, handle) = LayerizerDaemon::new(LayerizerDaemonConfig::default(), engine());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(daemon.run(async {
            let _ = stop_rx.await;
        }));

        let response = handle.request(Request::get("lower_flows")).await.unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, json!({}));

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_applied_in_order() {
        let (daemon, handle) = LayerizerDaemon::new(LayerizerDaemonConfig::default(), engine());
        let task = tokio::spawn(daemon.run(std::future::pending()));

        for (id, role, nw) in [("c1", "upper", "nw1"), ("c2", "upper", "nw9")] {
            let conn = Connection::logic_and_network(id, role, "lz", nw);
            handle
                .send_event(Event::ConnectionChanged(ConnectionChanged::add(conn)))
                .await
                .unwrap();
        }
        drop(handle);

        let engine = task.await.unwrap();
        assert_eq!(engine.bound_network(Role::Upper).as_deref(), Some("nw1"));
        assert_eq!(engine.stats().connections_rejected, 1);
    }

    #[tokio::test]
    async fn test_closed_daemon_rejects_sends() {
        let (daemon, handle) = LayerizerDaemon::new(LayerizerDaemonConfig::default(), engine());
        drop(daemon);

        assert_eq!(handle.request(Request::get("lower_flows")).await, Err(DaemonError::Closed));
        let event = Event::ConnectionChanged(ConnectionChanged::delete(
            Connection::logic_and_network("c1", "upper", "lz", "nw1"),
        ));
        assert_eq!(handle.try_send_event(event), Err(DaemonError::Closed));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let config = LayerizerDaemonConfig {
            queue_depth: 1,
            ..Default::default()
        };
        let (_daemon, handle) = LayerizerDaemon::new(config, engine());
        let event = Event::ConnectionChanged(ConnectionChanged::delete(
            Connection::logic_and_network("c1", "upper", "lz", "nw1"),
        ));

        assert_eq!(handle.try_send_event(event.clone()), Ok(()));
        assert_eq!(handle.try_send_event(event), Err(DaemonError::QueueFull));
    }

    #[tokio::test]
    async fn test_subscribed_sink_filters_events() {
        use mlo_orch_common::{Changed, EventKind, EventSubscription, Node, SubscriptionSink};

        let subscriptions = Arc::new(MemorySubscriptionSink::new());
        let mut subscription = EventSubscription::new();
        subscription.update_filter(EventKind::Node, "nw1", Vec::<String>::new());
        subscriptions.apply("lz", &subscription).unwrap();

        let (handle, mut inbox) = channel(4);
        let sink = handle.subscribed_sink(Arc::clone(&subscriptions), "lz");
        sink(Event::NodeChanged(Changed::add("nw1", Node::new("N1"))));
        sink(Event::NodeChanged(Changed::add("nw2", Node::new("N2"))));
        drop(sink);
        drop(handle);

        let mut forwarded = Vec::new();
        while let Some(event) = inbox.local_rx.recv().await {
            forwarded.push(event);
        }
        assert!(inbox.rx.recv().await.is_none());
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].network_id(), Some("nw1"));
    }

    #[tokio::test]
    async fn test_resync_larger_than_queue_loses_no_events() {
        use mlo_orch_common::{attr, Flow, FlowStatus, Method, NetworkInterface, Node};

        const PORTS: usize = 20;
        let config = LayerizerDaemonConfig {
            queue_depth: 4,
            ..Default::default()
        };
        let (handle, inbox) = channel(config.queue_depth);
        let subscriptions = Arc::new(MemorySubscriptionSink::new());
        let registry = Arc::new(
            MemoryNetworkRegistry::new().with_sink(handle.subscribed_sink(subscriptions.clone(), "lz")),
        );
        let context = LayerizerContext::new(
            Arc::new(MemorySystemManager::new()),
            registry.clone(),
            subscriptions,
        );
        let engine = LinkLayerizer::new(LinkLayerizerConfig::new("lz"), context);
        let task = tokio::spawn(LayerizerDaemon::with_inbox(config, engine, inbox).run(std::future::pending()));

        for (id, role, nw) in [("c1", "upper", "nw1"), ("c2", "lower", "nw2")] {
            let conn = Connection::logic_and_network(id, role, "lz", nw);
            handle
                .send_event(Event::ConnectionChanged(ConnectionChanged::add(conn)))
                .await
                .unwrap();
        }
        let mut upper_node = Node::new("N11");
        for p in 0..PORTS {
            let port = format!("P{}", p);
            let body = json!({
                "lower_nw": "nw2", "lower_nw_node": "N1", "lower_nw_port": port,
                "upper_nw": "nw1", "upper_nw_node": "N11", "upper_nw_port": port,
            });
            let request = Request::new(Method::Put, format!("settings/boundaries/b{}", p)).with_body(body);
            assert_eq!(handle.request(request).await.unwrap().status, Status::Ok);
            upper_node = upper_node.with_port(port);
        }
        registry.network("nw1").put_node(&upper_node).unwrap();
        for i in 0..PORTS / 2 {
            let mut flow = Flow::new(format!("F{}", i))
                .with_match("N1", format!("P{}", 2 * i))
                .with_edge_action("N1", format!("P{}", 2 * i + 1))
                .with_status(FlowStatus::Established);
            flow.set_attribute(attr::BANDWIDTH, "10G");
            registry.network("nw2").put_flow(&flow).unwrap();
        }

        let conn = Connection::logic_and_network("c3", "layerized", "lz", "nw3");
        handle
            .send_event(Event::ConnectionChanged(ConnectionChanged::add(conn)))
            .await
            .unwrap();
        // Answered only once every event published by the resync is handled.
        let lower_flows = handle.request(Request::get("lower_flows")).await.unwrap();

        assert_eq!(lower_flows.body.as_object().unwrap().len(), PORTS / 2);
        assert_eq!(registry.network("nw3").link_count(), PORTS / 2);
        assert_eq!(registry.network("nw1").link_count(), PORTS / 2);
        assert_eq!(registry.network("nw3").node_count(), 1);

        drop(handle);
        let engine = task.await.unwrap();
        assert_eq!(engine.stats().links_created, (PORTS / 2) as u64);
    }

    #[tokio::test]
    async fn test_zero_heartbeat_interval_is_raised() {
        let config = LayerizerDaemonConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        let (daemon, handle) = LayerizerDaemon::new(config, engine());
        assert_eq!(daemon.config.heartbeat_interval, MIN_HEARTBEAT_INTERVAL);

        let task = tokio::spawn(daemon.run(tokio::time::sleep(Duration::from_millis(20))));
        task.await.unwrap();
        drop(handle);
    }

    #[test]
    fn test_config_from_file_config() {
        let mut file_config = LayerizerConfig::default();
        file_config.daemon.queue_depth = 8;
        file_config.daemon.heartbeat_interval_ms = 250;

        let config = LayerizerDaemonConfig::from(&file_config);
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
    }
}
