//! In-process collaborators.
//!
//! [`MemoryNetwork`] is a complete network component held in memory. It
//! publishes change events to an optional sink after every mutation that
//! actually changes state; writing an identical object is a no-op and
//! publishes nothing. The registry, system manager and subscription sink in
//! this module complete the set needed to host a logic component without a
//! message transport.

use crate::connection::Connection;
use crate::event::{Changed, Event};
use crate::interface::{
    InterfaceError, InterfaceResult, NetworkInterface, NetworkInterfaceFactory, SubscriptionSink,
    SystemManagerInterface,
};
use crate::subscription::EventSubscription;
use crate::topology::{Attributes, Flow, FlowSet, Link, Node, Port};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receiver of events published by in-process networks.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Debug, Default)]
struct NetworkState {
    nodes: BTreeMap<String, Node>,
    links: BTreeMap<String, Link>,
    flows: BTreeMap<String, Flow>,
}

/// In-memory network component.
///
/// Clones share state, so a test can keep one handle while the logic under
/// test owns another.
#[derive(Clone)]
pub struct MemoryNetwork {
    network_id: String,
    state: Arc<Mutex<NetworkState>>,
    sink: Option<EventSink>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryNetwork")
            .field("network_id", &self.network_id)
            .field("nodes", &state.nodes.len())
            .field("links", &state.links.len())
            .field("flows", &state.flows.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            state: Arc::new(Mutex::new(NetworkState::default())),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn flow_count(&self) -> usize {
        self.state.lock().flows.len()
    }

    fn publish(&self, event: Option<Event>) {
        if let (Some(sink), Some(event)) = (&self.sink, event) {
            sink(event);
        }
    }

    fn changed<T: PartialEq + Clone>(
        &self,
        prev: Option<T>,
        curr: &T,
        wrap: fn(Changed<T>) -> Event,
    ) -> Option<Event> {
        match prev {
            None => Some(wrap(Changed::add(self.network_id.as_str(), curr.clone()))),
            Some(prev) if prev == *curr => None,
            Some(prev) => Some(wrap(Changed::update(
                self.network_id.as_str(),
                prev,
                curr.clone(),
            ))),
        }
    }
}

impl NetworkInterface for MemoryNetwork {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn get_nodes(&self) -> InterfaceResult<BTreeMap<String, Node>> {
        Ok(self.state.lock().nodes.clone())
    }

    fn get_node(&self, node_id: &str) -> InterfaceResult<Option<Node>> {
        Ok(self.state.lock().nodes.get(node_id).cloned())
    }

    fn put_node(&self, node: &Node) -> InterfaceResult<()> {
        let event = {
            let mut state = self.state.lock();
            let prev = state.nodes.insert(node.node_id.clone(), node.clone());
            self.changed(prev, node, Event::NodeChanged)
        };
        self.publish(event);
        Ok(())
    }

    fn del_node(&self, node_id: &str) -> InterfaceResult<()> {
        let event = self
            .state
            .lock()
            .nodes
            .remove(node_id)
            .map(|prev| Event::NodeChanged(Changed::delete(self.network_id.as_str(), prev)));
        self.publish(event);
        Ok(())
    }

    fn get_port(&self, node_id: &str, port_id: &str) -> InterfaceResult<Option<Port>> {
        Ok(self
            .state
            .lock()
            .nodes
            .get(node_id)
            .and_then(|node| node.ports.get(port_id))
            .cloned())
    }

    fn put_port(&self, port: &Port) -> InterfaceResult<()> {
        let event = {
            let mut state = self.state.lock();
            let node = state.nodes.get_mut(&port.node_id).ok_or_else(|| {
                InterfaceError::not_found(self.network_id.as_str(), "node", port.node_id.as_str())
            })?;
            let prev = node.ports.insert(port.port_id.clone(), port.clone());
            self.changed(prev, port, Event::PortChanged)
        };
        self.publish(event);
        Ok(())
    }

    fn del_port(&self, node_id: &str, port_id: &str) -> InterfaceResult<()> {
        let event = self
            .state
            .lock()
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.ports.remove(port_id))
            .map(|prev| Event::PortChanged(Changed::delete(self.network_id.as_str(), prev)));
        self.publish(event);
        Ok(())
    }

    fn get_links(&self) -> InterfaceResult<BTreeMap<String, Link>> {
        Ok(self.state.lock().links.clone())
    }

    fn get_link(&self, link_id: &str) -> InterfaceResult<Option<Link>> {
        Ok(self.state.lock().links.get(link_id).cloned())
    }

    fn put_link(&self, link: &Link) -> InterfaceResult<()> {
        let event = {
            let mut state = self.state.lock();
            let prev = state.links.insert(link.link_id.clone(), link.clone());
            self.changed(prev, link, Event::LinkChanged)
        };
        self.publish(event);
        Ok(())
    }

    fn del_link(&self, link_id: &str) -> InterfaceResult<()> {
        let event = self
            .state
            .lock()
            .links
            .remove(link_id)
            .map(|prev| Event::LinkChanged(Changed::delete(self.network_id.as_str(), prev)));
        self.publish(event);
        Ok(())
    }

    fn get_flow_set(&self) -> InterfaceResult<FlowSet> {
        Ok(FlowSet {
            flows: self.state.lock().flows.clone(),
        })
    }

    fn get_flow(&self, flow_id: &str) -> InterfaceResult<Option<Flow>> {
        Ok(self.state.lock().flows.get(flow_id).cloned())
    }

    fn put_flow(&self, flow: &Flow) -> InterfaceResult<()> {
        let event = {
            let mut state = self.state.lock();
            let prev = state.flows.insert(flow.flow_id.clone(), flow.clone());
            self.changed(prev, flow, Event::FlowChanged)
        };
        self.publish(event);
        Ok(())
    }

    fn del_flow(&self, flow_id: &str) -> InterfaceResult<()> {
        let event = self
            .state
            .lock()
            .flows
            .remove(flow_id)
            .map(|prev| Event::FlowChanged(Changed::delete(self.network_id.as_str(), prev)));
        self.publish(event);
        Ok(())
    }
}

/// Factory handing out shared [`MemoryNetwork`] handles by id.
#[derive(Default)]
pub struct MemoryNetworkRegistry {
    networks: Mutex<HashMap<String, MemoryNetwork>>,
    sink: Option<EventSink>,
    created: AtomicUsize,
}

impl MemoryNetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every network created from now on publishes into `sink`.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Returns the network for `network_id`, creating it if needed.
    pub fn network(&self, network_id: &str) -> MemoryNetwork {
        self.networks
            .lock()
            .entry(network_id.to_string())
            .or_insert_with(|| {
                let network = MemoryNetwork::new(network_id);
                match &self.sink {
                    Some(sink) => network.with_sink(Arc::clone(sink)),
                    None => network,
                }
            })
            .clone()
    }

    /// Number of interfaces handed out through [`NetworkInterfaceFactory::create`].
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl NetworkInterfaceFactory for MemoryNetworkRegistry {
    fn create(&self, network_id: &str) -> Box<dyn NetworkInterface> {
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(network_id, "creating in-memory network interface");
        Box::new(self.network(network_id))
    }
}

/// System manager that records every published connection state.
#[derive(Debug, Default)]
pub struct MemorySystemManager {
    history: Mutex<Vec<Connection>>,
}

impl MemorySystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection publication, oldest first.
    pub fn history(&self) -> Vec<Connection> {
        self.history.lock().clone()
    }

    /// Latest published version of a connection.
    pub fn latest(&self, connection_id: &str) -> Option<Connection> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|c| c.id == connection_id)
            .cloned()
    }
}

impl SystemManagerInterface for MemorySystemManager {
    fn put_connection(&self, connection: &Connection) -> InterfaceResult<()> {
        self.history.lock().push(connection.clone());
        Ok(())
    }
}

/// Subscription sink that keeps the latest subscription per subscriber and
/// can decide whether an event should be delivered.
#[derive(Debug, Default)]
pub struct MemorySubscriptionSink {
    subscriptions: Mutex<HashMap<String, EventSubscription>>,
}

impl MemorySubscriptionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self, subscriber_id: &str) -> Option<EventSubscription> {
        self.subscriptions.lock().get(subscriber_id).cloned()
    }

    /// Returns true if `event` passes `subscriber_id`'s filters.
    ///
    /// Connection events are always delivered. Updates that only touch
    /// attributes outside the filter list are dropped.
    pub fn accepts(&self, subscriber_id: &str, event: &Event) -> bool {
        let (Some(kind), Some(network_id)) = (event.kind(), event.network_id()) else {
            return true;
        };
        let subscriptions = self.subscriptions.lock();
        let Some(attributes) = subscriptions
            .get(subscriber_id)
            .and_then(|s| s.attributes(kind, network_id))
        else {
            return false;
        };
        match event {
            Event::NodeChanged(e) => update_passes(e, attributes, |n| &n.attributes, |n| {
                let mut n = n.clone();
                n.attributes.clear();
                n
            }),
            Event::PortChanged(e) => update_passes(e, attributes, |p| &p.attributes, |p| {
                let mut p = p.clone();
                p.attributes.clear();
                p
            }),
            Event::LinkChanged(e) => update_passes(e, attributes, |l| &l.attributes, |l| {
                let mut l = l.clone();
                l.attributes.clear();
                l
            }),
            Event::FlowChanged(e) => update_passes(e, attributes, |f| &f.attributes, |f| {
                let mut f = f.clone();
                f.attributes.clear();
                f
            }),
            Event::ConnectionChanged(_) => true,
        }
    }
}

fn update_passes<T: PartialEq>(
    event: &Changed<T>,
    filter: &[String],
    attributes: impl Fn(&T) -> &Attributes,
    structure: impl Fn(&T) -> T,
) -> bool {
    let (Some(prev), Some(curr)) = (&event.prev, &event.curr) else {
        return true;
    };
    if filter.is_empty() || structure(prev) != structure(curr) {
        return true;
    }
    let (prev_attrs, curr_attrs) = (attributes(prev), attributes(curr));
    filter
        .iter()
        .any(|key| prev_attrs.get(key) != curr_attrs.get(key))
}

impl SubscriptionSink for MemorySubscriptionSink {
    fn apply(&self, subscriber_id: &str, subscription: &EventSubscription) -> InterfaceResult<()> {
        self.subscriptions
            .lock()
            .insert(subscriber_id.to_string(), subscription.clone());
        Ok(())
    }
}

/// Sink that buffers events for later draining.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| events.lock().push(event))
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
