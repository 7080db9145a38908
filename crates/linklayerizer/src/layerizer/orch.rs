//! LinkLayerizer implementation.
//!
//! Projects lower-layer flows into the layerizer network as links, clones
//! those links into the upper network, and reflects link state changes back
//! down as lower flows.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mlo_orch_common::{
    attr, Action, Attributes, Changed, Component, Connection, ConnectionChanged, ConnectionState,
    ConversionTable, Event, EventKind, EventSubscription, Flow, FlowStatus, Link,
    NetworkInterface, NetworkInterfaceFactory, Node, Port, PortKey, Request, Response,
    SubscriptionSink, SystemManagerInterface, ValidationError, LOGIC_AND_NETWORK,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::boundary::BoundarySet;
use super::index::FlowLinkIndex;
use super::types::{
    Boundary, FlowTransition, PortRef, Role, COMPONENT_TYPE, SUBSCRIBED_ATTRIBUTES,
    SYNTHESIZED_FLOW_OWNER,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{LayerizerError, Result};

/// Fresh-id draws before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Collaborators handed to the engine at construction.
#[derive(Clone)]
pub struct LayerizerContext {
    /// Receives connection state publications.
    pub system_manager: Arc<dyn SystemManagerInterface>,
    /// Creates the interface for each joining network.
    pub interface_factory: Arc<dyn NetworkInterfaceFactory>,
    /// Receives the engine's event subscription whenever it changes.
    pub subscription_sink: Arc<dyn SubscriptionSink>,
}

impl LayerizerContext {
    pub fn new(
        system_manager: Arc<dyn SystemManagerInterface>,
        interface_factory: Arc<dyn NetworkInterfaceFactory>,
        subscription_sink: Arc<dyn SubscriptionSink>,
    ) -> Self {
        Self {
            system_manager,
            interface_factory,
            subscription_sink,
        }
    }
}

/// Configuration for LinkLayerizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLayerizerConfig {
    /// Logic id that connection descriptors must carry.
    pub id: String,
    /// Priority of flows synthesized from layerizer links.
    pub default_flow_priority: u16,
}

impl LinkLayerizerConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_flow_priority: 0,
        }
    }

    pub fn with_default_flow_priority(mut self, priority: u16) -> Self {
        self.default_flow_priority = priority;
        self
    }
}

/// Statistics for LinkLayerizer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkLayerizerStats {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_removed: u64,
    /// Layerizer links created from lower flows.
    pub links_created: u64,
    /// Layerizer links promoted or refreshed from lower flows.
    pub links_updated: u64,
    /// Layerizer links deleted after their lower flow went away.
    pub links_deleted: u64,
    /// Lower flows synthesized from layerizer links.
    pub flows_created: u64,
    pub flows_updated: u64,
    /// Lower flows cascade-deleted with their layerizer link.
    pub flows_deleted: u64,
    pub boundaries_stored: u64,
    pub boundaries_rejected: u64,
    pub requests_rejected: u64,
    /// Steps given up after an error.
    pub steps_abandoned: u64,
}

/// LinkLayerizer - reconciles the upper, lower and layerizer networks.
pub struct LinkLayerizer {
    config: LinkLayerizerConfig,
    context: LayerizerContext,
    /// Role registry and id translations.
    conversion: ConversionTable,
    /// Interfaces of joined networks, by network id.
    networks: HashMap<String, Arc<dyn NetworkInterface>>,
    subscription: EventSubscription,
    pub(super) boundaries: BoundarySet,
    pub(super) index: FlowLinkIndex,
    pub(super) stats: LinkLayerizerStats,
}

impl fmt::Debug for LinkLayerizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkLayerizer")
            .field("config", &self.config)
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .field("boundaries", &self.boundaries.len())
            .field("indexed_flows", &self.index.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl LinkLayerizer {
    pub fn new(config: LinkLayerizerConfig, context: LayerizerContext) -> Self {
        Self {
            config,
            context,
            conversion: ConversionTable::new(),
            networks: HashMap::new(),
            subscription: EventSubscription::new(),
            boundaries: BoundarySet::new(),
            index: FlowLinkIndex::new(),
            stats: LinkLayerizerStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn stats(&self) -> &LinkLayerizerStats {
        &self.stats
    }

    pub fn boundaries(&self) -> &BoundarySet {
        &self.boundaries
    }

    pub fn index(&self) -> &FlowLinkIndex {
        &self.index
    }

    pub fn conversion(&self) -> &ConversionTable {
        &self.conversion
    }

    pub fn subscription(&self) -> &EventSubscription {
        &self.subscription
    }

    /// Network currently bound to `role`.
    pub fn bound_network(&self, role: Role) -> Option<String> {
        self.conversion
            .connection_list(role.as_str())
            .into_iter()
            .next()
    }

    /// Role `network_id` is bound to.
    pub fn role_of(&self, network_id: &str) -> Option<Role> {
        self.conversion
            .connection_type(network_id)
            .and_then(|t| t.parse().ok())
    }

    fn role_network(&self, role: Role) -> Result<(String, Arc<dyn NetworkInterface>)> {
        self.bound_network(role)
            .and_then(|nw| {
                let interface = Arc::clone(self.networks.get(&nw)?);
                Some((nw, interface))
            })
            .ok_or(LayerizerError::RoleNotBound(role))
    }

    fn abandon(&mut self, step: &'static str, err: LayerizerError) {
        warn!(component = %self.config.id, step, error = %err, "abandoning step");
        self.stats.steps_abandoned += 1;
        audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, COMPONENT_TYPE, step)
            .with_object_id(&self.config.id)
            .with_error(err.to_string()));
    }

    // ----- role registration -----

    /// Handles one connection lifecycle event. Returns true if it was
    /// accepted.
    pub fn on_connection_changed(&mut self, event: ConnectionChanged) -> bool {
        match event.action {
            Action::Add => self.on_connection_added(event.curr.as_ref()),
            Action::Update => self.on_connection_updated(event.curr.as_ref()),
            Action::Delete => self.on_connection_deleted(event.prev.as_ref()),
        }
    }

    fn validate_connection<'a>(&self, curr: Option<&'a Connection>) -> Result<(&'a Connection, Role)> {
        let conn = curr.ok_or_else(|| {
            LayerizerError::InvalidConnection("event carries no connection".to_string())
        })?;
        if conn.object_type != LOGIC_AND_NETWORK {
            return Err(LayerizerError::InvalidConnection(format!(
                "object type {} is not {}",
                conn.object_type, LOGIC_AND_NETWORK
            )));
        }
        if conn.logic_id != self.config.id {
            return Err(LayerizerError::InvalidConnection(format!(
                "logic id {} does not name {}",
                conn.logic_id, self.config.id
            )));
        }
        if conn.network_id.is_empty() {
            return Err(LayerizerError::InvalidConnection(
                "network id is empty".to_string(),
            ));
        }
        let role: Role = conn
            .connection_type
            .parse()
            .map_err(LayerizerError::InvalidConnection)?;
        if let Some(bound) = self.bound_network(role) {
            if bound != conn.network_id {
                return Err(LayerizerError::RoleAlreadyBound {
                    role,
                    network_id: conn.network_id.clone(),
                    bound,
                });
            }
        }
        if let Some(existing) = self.role_of(&conn.network_id) {
            if existing != role {
                return Err(LayerizerError::InvalidConnection(format!(
                    "network {} is already bound as {}",
                    conn.network_id, existing
                )));
            }
        }
        Ok((conn, role))
    }

    #[instrument(skip_all, fields(component = %self.config.id))]
    pub fn on_connection_added(&mut self, curr: Option<&Connection>) -> bool {
        let (conn, role) = match self.validate_connection(curr) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "rejecting connection");
                self.stats.connections_rejected += 1;
                if let Some(conn) = curr {
                    self.publish_state(conn, ConnectionState::Error);
                }
                audit_log!(AuditRecord::new(
                    AuditCategory::ConnectionLifecycle,
                    COMPONENT_TYPE,
                    "add_connection"
                )
                .with_object_id(curr.map(|c| c.id.as_str()).unwrap_or_default())
                .with_object_type("connection")
                .with_error(e.to_string())
                .with_outcome(AuditOutcome::Denied));
                return false;
            }
        };

        let network_id = conn.network_id.clone();
        self.publish_state(conn, ConnectionState::Running);
        self.conversion
            .add_entry_connection_type(&network_id, role.as_str());
        if !self.networks.contains_key(&network_id) {
            let interface: Arc<dyn NetworkInterface> =
                Arc::from(self.context.interface_factory.create(&network_id));
            self.networks.insert(network_id.clone(), interface);
        }
        self.register_network_edges(role, &network_id);
        self.subscribe(&network_id);
        self.stats.connections_accepted += 1;

        info!(network_id = %network_id, %role, "network joined");
        audit_log!(AuditRecord::new(
            AuditCategory::ConnectionLifecycle,
            COMPONENT_TYPE,
            "add_connection"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&conn.id)
        .with_object_type("connection")
        .with_details(serde_json::json!({
            "network_id": network_id,
            "role": role.as_str(),
        })));

        self.resync();
        true
    }

    #[instrument(skip_all, fields(component = %self.config.id))]
    pub fn on_connection_updated(&mut self, curr: Option<&Connection>) -> bool {
        match self.validate_connection(curr) {
            Ok((conn, _)) if self.networks.contains_key(&conn.network_id) => {
                let network_id = conn.network_id.clone();
                self.subscribe(&network_id);
                debug!(network_id = %network_id, "subscription refreshed");
                true
            }
            Ok((conn, _)) => {
                debug!(network_id = %conn.network_id, "update for a network that never joined");
                false
            }
            Err(e) => {
                warn!(error = %e, "ignoring connection update");
                false
            }
        }
    }

    #[instrument(skip_all, fields(component = %self.config.id))]
    pub fn on_connection_deleted(&mut self, prev: Option<&Connection>) -> bool {
        let Some(conn) = prev else {
            warn!("connection delete carries no connection");
            return false;
        };
        if conn.logic_id != self.config.id {
            debug!(logic_id = %conn.logic_id, "connection delete for another logic");
            return false;
        }
        let network_id = conn.network_id.clone();
        let Some(role) = self.role_of(&network_id) else {
            debug!(network_id = %network_id, "connection delete for unbound network");
            return false;
        };

        self.publish_state(conn, ConnectionState::Finalizing);
        self.conversion.del_entry_network(&network_id);
        self.subscription.remove_network(&network_id);
        self.apply_subscription();
        self.conversion.del_entry_connection_type(&network_id);
        self.networks.remove(&network_id);
        self.index.clear();
        self.publish_state(conn, ConnectionState::None);
        self.stats.connections_removed += 1;

        info!(network_id = %network_id, %role, "network left");
        audit_log!(AuditRecord::new(
            AuditCategory::ConnectionLifecycle,
            COMPONENT_TYPE,
            "delete_connection"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&conn.id)
        .with_object_type("connection"));
        true
    }

    fn publish_state(&self, conn: &Connection, state: ConnectionState) {
        let updated = conn.clone().with_state(state);
        if let Err(e) = self.context.system_manager.put_connection(&updated) {
            error!(connection_id = %conn.id, %state, error = %e, "failed to publish connection state");
        }
    }

    fn register_network_edges(&mut self, role: Role, network_id: &str) {
        match role {
            Role::Layerized => {
                for other in [Role::Upper, Role::Lower] {
                    if let Some(peer) = self.bound_network(other) {
                        self.conversion.add_entry_network(&peer, network_id);
                    }
                }
            }
            Role::Upper | Role::Lower => {
                if let Some(layerized) = self.bound_network(Role::Layerized) {
                    self.conversion.add_entry_network(network_id, &layerized);
                }
            }
        }
    }

    fn subscribe(&mut self, network_id: &str) {
        for kind in EventKind::ALL {
            self.subscription
                .update_filter(kind, network_id, SUBSCRIBED_ATTRIBUTES);
        }
        self.apply_subscription();
    }

    fn apply_subscription(&self) {
        if let Err(e) = self
            .context
            .subscription_sink
            .apply(&self.config.id, &self.subscription)
        {
            error!(error = %e, "failed to apply event subscription");
        }
    }

    // ----- resynchronization -----

    /// Copies the upper topology into the layerizer network and replays the
    /// lower flow set. No-op until all three roles are bound.
    #[instrument(skip_all, fields(component = %self.config.id))]
    pub fn resync(&mut self) {
        let (Some(upper), Some(lower), Some(_)) = (
            self.bound_network(Role::Upper),
            self.bound_network(Role::Lower),
            self.bound_network(Role::Layerized),
        ) else {
            debug!("resync deferred until upper, lower and layerized are bound");
            return;
        };

        let nodes = self
            .role_network(Role::Upper)
            .and_then(|(_, nw)| Ok(nw.get_nodes()?));
        match nodes {
            Ok(nodes) => {
                for node in nodes.values() {
                    if let Err(e) = self.mirror_upper_node(node, None) {
                        self.abandon("mirror upper node", e);
                    }
                }
            }
            Err(e) => self.abandon("read upper topology", e),
        }

        let flows = self
            .role_network(Role::Lower)
            .and_then(|(_, nw)| Ok(nw.get_flow_set()?));
        match flows {
            Ok(flow_set) => {
                for flow in flow_set.flows.values() {
                    let transition =
                        FlowTransition::classify(Role::Lower, Action::Add, None, Some(flow.status));
                    if transition == FlowTransition::ProjectToLink {
                        if let Err(e) = self.project_lower_flow(flow) {
                            self.abandon("project lower flow", e);
                        }
                    }
                }
            }
            Err(e) => self.abandon("read lower flows", e),
        }

        info!(upper = %upper, lower = %lower, indexed = self.index.len(), "resync complete");
    }

    // ----- topology events -----

    /// Routes one node/port/link/flow change to its pipeline.
    pub fn on_topology_event(&mut self, event: Event) {
        let Some(network_id) = event.network_id().map(str::to_string) else {
            return;
        };
        let Some(role) = self.role_of(&network_id) else {
            debug!(network_id = %network_id, "event from unbound network ignored");
            return;
        };

        let result = match (role, event) {
            (Role::Upper, Event::NodeChanged(e)) => self.on_upper_node_changed(&e),
            (Role::Upper, Event::PortChanged(e)) => self.on_upper_port_changed(&e),
            (Role::Layerized, Event::LinkChanged(e)) => self.on_layerized_link_changed(&e),
            (_, Event::FlowChanged(e)) => self.on_flow_changed(role, &e),
            (role, other) => {
                debug!(%role, kind = ?other.kind(), "event not relevant to role");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.abandon("topology event", e);
        }
    }

    fn on_upper_node_changed(&mut self, event: &Changed<Node>) -> Result<()> {
        if self.bound_network(Role::Layerized).is_none() {
            return Ok(());
        }
        match (event.action, event.object()) {
            (_, None) => Ok(()),
            (Action::Delete, Some(node)) => self.remove_mirrored_node(node),
            (Action::Add | Action::Update, Some(node)) => {
                self.mirror_upper_node(node, event.prev.as_ref())
            }
        }
    }

    fn on_upper_port_changed(&mut self, event: &Changed<Port>) -> Result<()> {
        if self.bound_network(Role::Layerized).is_none() {
            return Ok(());
        }
        match (event.action, event.object()) {
            (_, None) => Ok(()),
            (Action::Delete, Some(port)) => self.remove_mirrored_port(port),
            (Action::Add | Action::Update, Some(port)) => self.mirror_upper_port(port),
        }
    }

    fn mirror_upper_node(&mut self, node: &Node, prev: Option<&Node>) -> Result<()> {
        let upper_id = self
            .bound_network(Role::Upper)
            .ok_or(LayerizerError::RoleNotBound(Role::Upper))?;
        let (lz_id, lz) = self.role_network(Role::Layerized)?;

        lz.put_node(node)?;
        self.conversion
            .add_entry_node(&upper_id, &node.node_id, &lz_id, &node.node_id);
        for port_id in node.ports.keys() {
            self.conversion.add_entry_port(
                PortKey::new(&upper_id, &node.node_id, port_id),
                PortKey::new(&lz_id, &node.node_id, port_id),
            );
        }
        if let Some(prev) = prev {
            for port_id in prev.ports.keys().filter(|p| !node.ports.contains_key(*p)) {
                self.conversion
                    .del_entry_port(&upper_id, &prev.node_id, port_id);
            }
        }
        debug!(node_id = %node.node_id, ports = node.ports.len(), "mirrored upper node");
        Ok(())
    }

    fn mirror_upper_port(&mut self, port: &Port) -> Result<()> {
        let upper_id = self
            .bound_network(Role::Upper)
            .ok_or(LayerizerError::RoleNotBound(Role::Upper))?;
        let (lz_id, lz) = self.role_network(Role::Layerized)?;

        lz.put_port(port)?;
        self.conversion.add_entry_port(
            PortKey::new(&upper_id, &port.node_id, &port.port_id),
            PortKey::new(&lz_id, &port.node_id, &port.port_id),
        );
        Ok(())
    }

    fn remove_mirrored_node(&mut self, node: &Node) -> Result<()> {
        let upper_id = self
            .bound_network(Role::Upper)
            .ok_or(LayerizerError::RoleNotBound(Role::Upper))?;
        let (_, lz) = self.role_network(Role::Layerized)?;

        lz.del_node(&node.node_id)?;
        self.conversion.del_entry_node(&upper_id, &node.node_id);
        for port_id in node.ports.keys() {
            self.conversion
                .del_entry_port(&upper_id, &node.node_id, port_id);
        }
        Ok(())
    }

    fn remove_mirrored_port(&mut self, port: &Port) -> Result<()> {
        let upper_id = self
            .bound_network(Role::Upper)
            .ok_or(LayerizerError::RoleNotBound(Role::Upper))?;
        let (_, lz) = self.role_network(Role::Layerized)?;

        lz.del_port(&port.node_id, &port.port_id)?;
        self.conversion
            .del_entry_port(&upper_id, &port.node_id, &port.port_id);
        Ok(())
    }

    fn on_flow_changed(&mut self, role: Role, event: &Changed<Flow>) -> Result<()> {
        let transition = FlowTransition::classify(
            role,
            event.action,
            event.prev.as_ref().map(|f| f.status),
            event.curr.as_ref().map(|f| f.status),
        );
        let Some(flow) = event.object() else {
            return Ok(());
        };
        match transition {
            FlowTransition::ProjectToLink => self.project_lower_flow(flow),
            FlowTransition::RetractLink => self.retract_lower_flow(&flow.flow_id),
            FlowTransition::MirrorToUpper => self.mirror_layerized_flow(flow),
            FlowTransition::RetractUpper => self.retract_layerized_flow(&flow.flow_id),
            FlowTransition::Suppress => {
                debug!(flow_id = %flow.flow_id, "established flow re-announced");
                Ok(())
            }
            FlowTransition::Ignore => Ok(()),
        }
    }

    // ----- lower flow -> layerizer link -----

    /// Creates or promotes the layerizer link backed by `flow`.
    fn project_lower_flow(&mut self, flow: &Flow) -> Result<()> {
        let (_, lz) = self.role_network(Role::Layerized)?;

        if let Some(link_id) = self.index.link_for(&flow.flow_id).map(str::to_string) {
            match lz.get_link(&link_id)? {
                Some(link) => return self.promote_link(lz.as_ref(), link, flow),
                None => {
                    warn!(flow_id = %flow.flow_id, link_id = %link_id, "indexed link vanished, recreating");
                    self.index.remove_flow(&flow.flow_id);
                }
            }
        }
        self.create_link(lz.as_ref(), flow)
    }

    fn create_link(&mut self, lz: &dyn NetworkInterface, flow: &Flow) -> Result<()> {
        let mut link = self.link_from_flow(flow)?;
        link.link_id = fresh_id("link", |id| Ok(lz.get_link(id)?.is_none()))?;
        link.validate().map_err(LayerizerError::InvalidLink)?;

        lz.put_link(&link)?;
        self.index.insert(&link.link_id, &flow.flow_id);
        self.stats.links_created += 1;

        info!(link_id = %link.link_id, flow_id = %flow.flow_id, "layerized link created");
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, COMPONENT_TYPE, "create_link")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&link.link_id)
            .with_object_type("link")
            .with_details(serde_json::json!({ "flow_id": flow.flow_id })));
        Ok(())
    }

    fn promote_link(&mut self, lz: &dyn NetworkInterface, mut link: Link, flow: &Flow) -> Result<()> {
        let before = link.clone();
        copy_projected(&flow.attributes, &mut link.attributes);
        link.set_attribute(attr::OPER_STATUS, attr::OPER_STATUS_UP);
        link.set_attribute(attr::ESTABLISHMENT_STATUS, flow.status.as_str());
        if link == before {
            debug!(link_id = %link.link_id, "layerized link already current");
            return Ok(());
        }

        lz.put_link(&link)?;
        self.stats.links_updated += 1;
        debug!(link_id = %link.link_id, status = %flow.status, "layerized link updated");
        audit_log!(AuditRecord::new(AuditCategory::ResourceModify, COMPONENT_TYPE, "update_link")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&link.link_id)
            .with_object_type("link"));
        Ok(())
    }

    /// Derives an (id-less) layerizer link from a lower flow's single
    /// ingress and egress point.
    fn link_from_flow(&self, flow: &Flow) -> Result<Link> {
        let targets = flow.edge_targets();
        if targets.len() > 1 {
            return Err(LayerizerError::MultipleEdgeActions {
                flow_id: flow.flow_id.clone(),
                count: targets.len(),
            });
        }
        let (dst_node, dst_port) = targets
            .first()
            .copied()
            .ok_or(LayerizerError::InvalidFlow(ValidationError::NoEdgeAction))?;
        let ingress = flow
            .matches
            .first()
            .ok_or(LayerizerError::InvalidFlow(ValidationError::NoMatch))?;

        let src = self.low_to_upper(&ingress.in_node, &ingress.in_port)?;
        let dst = self.low_to_upper(dst_node, dst_port)?;

        let mut link = Link::new("", src.node_id, src.port_id, dst.node_id, dst.port_id);
        copy_projected(&flow.attributes, &mut link.attributes);
        link.set_attribute(attr::ESTABLISHMENT_STATUS, flow.status.as_str());
        Ok(link)
    }

    fn low_to_upper(&self, node_id: &str, port_id: &str) -> Result<PortRef> {
        self.boundaries
            .low_to_upper(node_id, port_id)
            .ok_or_else(|| LayerizerError::NoBoundary {
                node: node_id.to_string(),
                port: port_id.to_string(),
            })
    }

    fn upper_to_low(&self, node_id: &str, port_id: &str) -> Result<PortRef> {
        self.boundaries
            .upper_to_low(node_id, port_id)
            .ok_or_else(|| LayerizerError::NoBoundary {
                node: node_id.to_string(),
                port: port_id.to_string(),
            })
    }

    // ----- layerizer link -> upper link / lower flows -----

    fn on_layerized_link_changed(&mut self, event: &Changed<Link>) -> Result<()> {
        match (event.action, event.object()) {
            (_, None) => Ok(()),
            (Action::Delete, Some(link)) => self.retract_layerized_link(link),
            (Action::Add | Action::Update, Some(link)) => {
                let Some(status) = link.attribute(attr::ESTABLISHMENT_STATUS) else {
                    debug!(link_id = %link.link_id, "link without establishment status ignored");
                    return Ok(());
                };
                if let Err(e) = self.clone_link_to_upper(link) {
                    self.abandon("clone link to upper", e);
                }
                self.reflect_link_to_lower(link, status)
            }
        }
    }

    fn clone_link_to_upper(&mut self, link: &Link) -> Result<()> {
        let (lz_id, _) = self.role_network(Role::Layerized)?;
        let (upper_id, upper) = self.role_network(Role::Upper)?;

        upper.put_link(link)?;
        self.conversion
            .add_entry_link(&lz_id, &link.link_id, &upper_id, &link.link_id);
        Ok(())
    }

    fn reflect_link_to_lower(&mut self, link: &Link, status: &str) -> Result<()> {
        if status == FlowStatus::Established.as_str() {
            return Ok(());
        }
        let (_, lower) = self.role_network(Role::Lower)?;

        let flow_ids = self.index.flows_for(&link.link_id).to_vec();
        if flow_ids.is_empty() {
            return self.synthesize_lower_flow(lower.as_ref(), link);
        }

        let status: FlowStatus = status.parse().map_err(LayerizerError::InvalidStatus)?;
        for flow_id in flow_ids {
            if let Err(e) = self.update_backing_flow(lower.as_ref(), &flow_id, link, status) {
                self.abandon("update backing flow", e);
            }
        }
        Ok(())
    }

    fn update_backing_flow(
        &mut self,
        lower: &dyn NetworkInterface,
        flow_id: &str,
        link: &Link,
        status: FlowStatus,
    ) -> Result<()> {
        let Some(mut flow) = lower.get_flow(flow_id)? else {
            warn!(flow_id, link_id = %link.link_id, "indexed flow missing from lower network");
            return Ok(());
        };
        let before = flow.clone();
        flow.status = status;
        copy_projected(&link.attributes, &mut flow.attributes);
        if flow == before {
            return Ok(());
        }

        lower.put_flow(&flow)?;
        self.stats.flows_updated += 1;
        debug!(flow_id, %status, "backing flow updated");
        audit_log!(AuditRecord::new(AuditCategory::ResourceModify, COMPONENT_TYPE, "update_flow")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(flow_id)
            .with_object_type("flow"));
        Ok(())
    }

    fn synthesize_lower_flow(&mut self, lower: &dyn NetworkInterface, link: &Link) -> Result<()> {
        let mut flow = self.flow_from_link(link)?;
        flow.flow_id = fresh_id("flow", |id| Ok(lower.get_flow(id)?.is_none()))?;
        flow.validate().map_err(LayerizerError::InvalidFlow)?;

        lower.put_flow(&flow)?;
        self.index.insert(&link.link_id, &flow.flow_id);
        self.stats.flows_created += 1;

        info!(flow_id = %flow.flow_id, link_id = %link.link_id, "lower flow synthesized");
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, COMPONENT_TYPE, "create_flow")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&flow.flow_id)
            .with_object_type("flow")
            .with_details(serde_json::json!({ "link_id": link.link_id })));
        Ok(())
    }

    /// Derives an (id-less) establishing lower flow from a layerizer link.
    fn flow_from_link(&self, link: &Link) -> Result<Flow> {
        let src = self.upper_to_low(&link.src_node, &link.src_port)?;
        let dst = self.upper_to_low(&link.dst_node, &link.dst_port)?;

        let mut flow = Flow::new("")
            .with_match(src.node_id, src.port_id)
            .with_edge_action(dst.node_id, dst.port_id)
            .with_status(FlowStatus::Establishing);
        flow.owner = SYNTHESIZED_FLOW_OWNER.to_string();
        flow.enabled = true;
        flow.priority = self.config.default_flow_priority;
        for key in attr::PROJECTED {
            flow.set_attribute(key, link.attribute(key).unwrap_or_default());
        }
        Ok(flow)
    }

    // ----- deletion cascades -----

    fn retract_layerized_link(&mut self, link: &Link) -> Result<()> {
        let flow_ids = self.index.remove_link(&link.link_id);
        if !flow_ids.is_empty() {
            let (_, lower) = self.role_network(Role::Lower)?;
            for flow_id in &flow_ids {
                match lower.del_flow(flow_id) {
                    Ok(()) => {
                        self.stats.flows_deleted += 1;
                        audit_log!(AuditRecord::new(
                            AuditCategory::ResourceDelete,
                            COMPONENT_TYPE,
                            "delete_flow"
                        )
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(flow_id)
                        .with_object_type("flow"));
                    }
                    Err(e) => self.abandon("delete backing flow", e.into()),
                }
            }
            info!(link_id = %link.link_id, flows = flow_ids.len(), "backing flows deleted");
        }
        self.retract_upper_link(&link.link_id)
    }

    fn retract_upper_link(&mut self, link_id: &str) -> Result<()> {
        let Some(lz_id) = self.bound_network(Role::Layerized) else {
            return Ok(());
        };
        let clones = self.conversion.del_entry_link(&lz_id, link_id);
        if clones.is_empty() {
            return Ok(());
        }
        let (upper_id, upper) = self.role_network(Role::Upper)?;
        for key in clones.iter().filter(|k| k.network_id == upper_id) {
            upper.del_link(&key.object_id)?;
        }
        Ok(())
    }

    fn retract_lower_flow(&mut self, flow_id: &str) -> Result<()> {
        let Some(link_id) = self.index.remove_flow(flow_id) else {
            return Ok(());
        };
        let (_, lz) = self.role_network(Role::Layerized)?;
        lz.del_link(&link_id)?;
        self.stats.links_deleted += 1;

        info!(link_id = %link_id, flow_id, "layerized link deleted");
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, COMPONENT_TYPE, "delete_link")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&link_id)
            .with_object_type("link"));
        Ok(())
    }

    // ----- layerizer flow -> upper flow -----

    fn mirror_layerized_flow(&mut self, flow: &Flow) -> Result<()> {
        let (lz_id, _) = self.role_network(Role::Layerized)?;
        let (upper_id, upper) = self.role_network(Role::Upper)?;

        upper.put_flow(flow)?;
        self.conversion
            .add_entry_flow(&lz_id, &flow.flow_id, &upper_id, &flow.flow_id);
        Ok(())
    }

    fn retract_layerized_flow(&mut self, flow_id: &str) -> Result<()> {
        let (lz_id, _) = self.role_network(Role::Layerized)?;
        let (upper_id, upper) = self.role_network(Role::Upper)?;

        let mut targets: Vec<String> = self
            .conversion
            .del_entry_flow(&lz_id, flow_id)
            .into_iter()
            .filter(|k| k.network_id == upper_id)
            .map(|k| k.object_id)
            .collect();
        if targets.is_empty() {
            targets.push(flow_id.to_string());
        }
        for target in targets {
            if upper.get_flow(&target)?.is_some() {
                upper.del_flow(&target)?;
            }
        }
        Ok(())
    }

    // ----- boundaries -----

    /// Stores `boundary`, assigning a fresh id when it has none.
    pub fn create_boundary(&mut self, mut boundary: Boundary) -> Result<Boundary> {
        if boundary.boundary_id.is_empty() {
            boundary.boundary_id = Uuid::new_v4().to_string();
        }
        self.put_boundary(boundary)
    }

    /// Stores or replaces `boundary` if it names the bound lower and upper
    /// networks.
    pub fn put_boundary(&mut self, boundary: Boundary) -> Result<Boundary> {
        let lower = self.bound_network(Role::Lower);
        let upper = self.bound_network(Role::Upper);
        if lower.as_deref() != Some(boundary.lower_nw.as_str())
            || upper.as_deref() != Some(boundary.upper_nw.as_str())
        {
            self.stats.boundaries_rejected += 1;
            let err = LayerizerError::UndefinedBoundary {
                lower_nw: boundary.lower_nw.clone(),
                upper_nw: boundary.upper_nw.clone(),
            };
            audit_log!(AuditRecord::new(AuditCategory::BoundaryChange, COMPONENT_TYPE, "put_boundary")
                .with_object_id(&boundary.boundary_id)
                .with_object_type("boundary")
                .with_error(err.to_string())
                .with_outcome(AuditOutcome::Denied));
            return Err(err);
        }

        let replaced = self.boundaries.insert(boundary.clone());
        self.stats.boundaries_stored += 1;
        audit_log!(AuditRecord::new(AuditCategory::BoundaryChange, COMPONENT_TYPE, "put_boundary")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(&boundary.boundary_id)
            .with_object_type("boundary")
            .with_details(serde_json::json!({ "replaced": replaced.is_some() })));
        Ok(boundary)
    }

    pub fn delete_boundary(&mut self, boundary_id: &str) -> Option<Boundary> {
        let removed = self.boundaries.remove(boundary_id)?;
        audit_log!(AuditRecord::new(AuditCategory::BoundaryChange, COMPONENT_TYPE, "delete_boundary")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(boundary_id)
            .with_object_type("boundary"));
        Some(removed)
    }
}

/// Copies the projected attribute set, leaving other keys untouched.
fn copy_projected(from: &Attributes, to: &mut Attributes) {
    for key in attr::PROJECTED {
        if let Some(value) = from.get(key) {
            to.insert(key.to_string(), value.clone());
        }
    }
}

/// Draws random ids until `is_free` accepts one.
fn fresh_id(kind: &'static str, is_free: impl Fn(&str) -> Result<bool>) -> Result<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = Uuid::new_v4().to_string();
        if is_free(&id)? {
            return Ok(id);
        }
    }
    Err(LayerizerError::IdExhausted(kind))
}

impl Component for LinkLayerizer {
    fn component_id(&self) -> &str {
        &self.config.id
    }

    fn component_type(&self) -> &str {
        COMPONENT_TYPE
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ConnectionChanged(e) => {
                self.on_connection_changed(e);
            }
            other => self.on_topology_event(other),
        }
    }

    fn handle_request(&mut self, request: &Request) -> Response {
        self.dispatch_request(request)
    }

    fn on_timer(&mut self) {
        if !self.index.is_consistent() {
            error!(component = %self.config.id, "flow/link index views disagree");
        }
        debug!(
            component = %self.config.id,
            links_created = self.stats.links_created,
            flows_created = self.stats.flows_created,
            steps_abandoned = self.stats.steps_abandoned,
            "heartbeat"
        );
    }

    fn dump_state(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for role in Role::ALL {
            lines.push(format!(
                "{}: {}",
                role,
                self.bound_network(role).unwrap_or_else(|| "-".to_string())
            ));
        }
        lines.push(format!("boundaries: {}", self.boundaries.len()));
        for (link_id, flows) in self.index.lower_flows() {
            lines.push(format!("link {} <- {}", link_id, flows.join(",")));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlo_orch_common::memory::{MemoryNetworkRegistry, MemorySubscriptionSink, MemorySystemManager};
    use pretty_assertions::assert_eq;

    const ID: &str = "lz";

    struct Harness {
        engine: LinkLayerizer,
        registry: Arc<MemoryNetworkRegistry>,
        system: Arc<MemorySystemManager>,
        sink: Arc<MemorySubscriptionSink>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(MemoryNetworkRegistry::new());
        let system = Arc::new(MemorySystemManager::new());
        let sink = Arc::new(MemorySubscriptionSink::new());
        let context = LayerizerContext::new(system.clone(), registry.clone(), sink.clone());
        Harness {
            engine: LinkLayerizer::new(LinkLayerizerConfig::new(ID), context),
            registry,
            system,
            sink,
        }
    }

    fn conn(id: &str, role: &str, nw: &str) -> Connection {
        Connection::logic_and_network(id, role, ID, nw)
    }

    fn joined() -> Harness {
        let mut h = harness();
        assert!(h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1"))));
        assert!(h.engine.on_connection_added(Some(&conn("c2", "lower", "nw2"))));
        assert!(h.engine.on_connection_added(Some(&conn("c3", "layerized", "nw3"))));
        h
    }

    fn boundary(id: &str, lower: (&str, &str), upper: (&str, &str)) -> Boundary {
        Boundary::new(id, "nw2", PortRef::new(lower.0, lower.1), "nw1", PortRef::new(upper.0, upper.1))
    }

    fn lower_flow(id: &str, status: FlowStatus) -> Flow {
        let mut flow = Flow::new(id)
            .with_match("N1", "P1")
            .with_edge_action("N1", "P2")
            .with_status(status);
        flow.set_attribute(attr::BANDWIDTH, "10G");
        flow
    }

    #[test]
    fn test_connection_accepted() {
        let mut h = harness();
        assert!(h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1"))));

        assert_eq!(h.engine.bound_network(Role::Upper).as_deref(), Some("nw1"));
        assert_eq!(h.engine.role_of("nw1"), Some(Role::Upper));
        assert_eq!(h.system.latest("c1").unwrap().state, ConnectionState::Running);
        assert_eq!(h.registry.created(), 1);
        let sub = h.sink.subscription(ID).unwrap();
        for kind in EventKind::ALL {
            assert_eq!(sub.attributes(kind, "nw1").unwrap().len(), SUBSCRIBED_ATTRIBUTES.len());
        }
    }

    #[test]
    fn test_connection_rejections_publish_error() {
        let mut h = harness();
        let mut wrong_type = conn("c1", "upper", "nw1");
        wrong_type.object_type = "LogicAndLogic".to_string();
        let foreign = Connection::logic_and_network("c2", "upper", "other", "nw1");
        let no_network = conn("c3", "upper", "");
        let unknown_role = conn("c4", "sideways", "nw1");

        for c in [&wrong_type, &foreign, &no_network, &unknown_role] {
            assert!(!h.engine.on_connection_added(Some(c)));
            assert_eq!(h.system.latest(&c.id).unwrap().state, ConnectionState::Error);
        }
        assert!(!h.engine.on_connection_added(None));
        assert_eq!(h.engine.stats().connections_rejected, 5);
        assert_eq!(h.registry.created(), 0);
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut h = harness();
        assert!(h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1"))));
        assert!(!h.engine.on_connection_added(Some(&conn("c9", "upper", "nw9"))));

        assert_eq!(h.system.latest("c9").unwrap().state, ConnectionState::Error);
        assert_eq!(h.engine.bound_network(Role::Upper).as_deref(), Some("nw1"));
        assert_eq!(h.registry.created(), 1);
    }

    #[test]
    fn test_network_cannot_hold_two_roles() {
        let mut h = harness();
        assert!(h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1"))));
        assert!(!h.engine.on_connection_added(Some(&conn("c2", "lower", "nw1"))));
        assert_eq!(h.engine.bound_network(Role::Lower), None);
    }

    #[test]
    fn test_update_validation() {
        let mut h = harness();
        assert!(h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1"))));

        assert!(h.engine.on_connection_updated(Some(&conn("c1", "upper", "nw1"))));
        assert!(!h.engine.on_connection_updated(Some(&conn("c9", "upper", "nw9"))));
        assert!(!h.engine.on_connection_updated(None));
        // no ERROR publication on update
        assert!(h.system.latest("c9").is_none());
    }

    #[test]
    fn test_network_edges_registered() {
        let h = joined();
        assert_eq!(h.engine.conversion().networks("nw3"), vec!["nw1", "nw2"]);
    }

    #[test]
    fn test_delete_releases_role() {
        let mut h = joined();
        h.engine.index.insert("L1", "F1");

        assert!(h.engine.on_connection_deleted(Some(&conn("c1", "upper", "nw1"))));

        let states: Vec<ConnectionState> = h
            .system
            .history()
            .into_iter()
            .filter(|c| c.id == "c1")
            .map(|c| c.state)
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Running, ConnectionState::Finalizing, ConnectionState::None]
        );
        assert_eq!(h.engine.bound_network(Role::Upper), None);
        assert!(h.engine.index().is_empty());
        assert!(!h.sink.subscription(ID).unwrap().is_subscribed(EventKind::Node, "nw1"));
        assert_eq!(h.engine.conversion().networks("nw3"), vec!["nw2"]);

        assert!(!h.engine.on_connection_deleted(Some(&conn("c1", "upper", "nw1"))));
    }

    #[test]
    fn test_resync_mirrors_upper_nodes() {
        let mut h = harness();
        let upper = h.registry.network("nw1");
        upper.put_node(&Node::new("NW=U,NE=N11").with_port("P1").with_port("P2")).unwrap();

        h.engine.on_connection_added(Some(&conn("c1", "upper", "nw1")));
        h.engine.on_connection_added(Some(&conn("c2", "lower", "nw2")));
        assert_eq!(h.registry.network("nw3").node_count(), 0);
        h.engine.on_connection_added(Some(&conn("c3", "layerized", "nw3")));

        let mirrored = h.registry.network("nw3").get_node("NW=U,NE=N11").unwrap().unwrap();
        assert_eq!(mirrored.ports.len(), 2);
        assert_eq!(
            h.engine.conversion().port("nw1", "NW=U,NE=N11", "P2"),
            vec![PortKey::new("nw3", "NW=U,NE=N11", "P2")]
        );
    }

    #[test]
    fn test_project_creates_link_once() {
        let mut h = joined();
        h.engine.put_boundary(boundary("b1", ("N1", "P1"), ("N11", "P1"))).unwrap();
        h.engine.put_boundary(boundary("b2", ("N1", "P2"), ("N11", "P2"))).unwrap();

        let flow = lower_flow("F1", FlowStatus::Established);
        h.engine.project_lower_flow(&flow).unwrap();
        h.engine.project_lower_flow(&flow).unwrap();

        let links = h.registry.network("nw3").get_links().unwrap();
        assert_eq!(links.len(), 1);
        let link = links.values().next().unwrap();
        assert_eq!((link.src_node.as_str(), link.dst_port.as_str()), ("N11", "P2"));
        assert_eq!(link.attribute(attr::BANDWIDTH), Some("10G"));
        assert_eq!(link.attribute(attr::OPER_STATUS), Some("UP"));
        assert_eq!(h.engine.index().link_for("F1"), Some(link.link_id.as_str()));
        assert_eq!(h.engine.stats().links_created, 1);
        assert_eq!(h.engine.stats().links_updated, 1);
    }

    #[test]
    fn test_project_rejects_multiple_edge_actions() {
        let mut h = joined();
        h.engine.put_boundary(boundary("b1", ("N1", "P1"), ("N11", "P1"))).unwrap();
        let flow = lower_flow("F1", FlowStatus::Establishing).with_edge_action("N2", "P3");

        let err = h.engine.project_lower_flow(&flow).unwrap_err();
        assert!(matches!(err, LayerizerError::MultipleEdgeActions { count: 2, .. }));
        assert!(h.engine.index().is_empty());
    }

    #[test]
    fn test_project_requires_boundary() {
        let mut h = joined();
        h.engine.put_boundary(boundary("b1", ("N1", "P1"), ("N11", "P1"))).unwrap();

        let err = h
            .engine
            .project_lower_flow(&lower_flow("F1", FlowStatus::Establishing))
            .unwrap_err();
        assert!(matches!(err, LayerizerError::NoBoundary { .. }));
        assert_eq!(h.registry.network("nw3").link_count(), 0);
    }

    #[test]
    fn test_flow_from_link() {
        let mut h = joined();
        h.engine.put_boundary(boundary("b1", ("N1", "P1"), ("N11", "P1"))).unwrap();
        h.engine.put_boundary(boundary("b2", ("N1", "P2"), ("N11", "P2"))).unwrap();
        let mut link = Link::new("L1", "N11", "P1", "N11", "P2");
        link.set_attribute(attr::LATENCY, "5");

        let flow = h.engine.flow_from_link(&link).unwrap();
        assert_eq!(flow.owner, "Any");
        assert!(flow.enabled);
        assert_eq!(flow.priority, 0);
        assert_eq!(flow.status, FlowStatus::Establishing);
        assert_eq!(flow.edge_targets(), vec![("N1", "P2")]);
        assert_eq!(flow.attribute(attr::LATENCY), Some("5"));
        assert_eq!(flow.attribute(attr::BANDWIDTH), Some(""));
        assert_eq!(flow.version, "0");
    }

    #[test]
    fn test_put_boundary_rejects_unbound_networks() {
        let mut h = joined();
        let mut b = boundary("b1", ("N1", "P1"), ("N11", "P1"));
        b.upper_nw = "nw9".to_string();

        let err = h.engine.put_boundary(b).unwrap_err();
        assert!(err.to_string().contains("Undefined Boundary."));
        assert!(h.engine.boundaries().is_empty());
    }

    #[test]
    fn test_create_boundary_assigns_id() {
        let mut h = joined();
        let stored = h.engine.create_boundary(boundary("", ("N1", "P1"), ("N11", "P1"))).unwrap();
        assert!(!stored.boundary_id.is_empty());
        assert!(h.engine.boundaries().get(&stored.boundary_id).is_some());
        assert_eq!(h.engine.delete_boundary(&stored.boundary_id), Some(stored));
    }

    #[test]
    fn test_dump_state() {
        let h = joined();
        let state = h.engine.dump_state();
        assert_eq!(state[0], "upper: nw1");
        assert_eq!(state[2], "layerized: nw3");
        assert_eq!(h.engine.component_type(), "LinkLayerizer");
    }
}
