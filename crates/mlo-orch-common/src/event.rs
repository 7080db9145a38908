//! Change events delivered to components.
//!
//! Every topology change is published by the network that owns the object
//! as a [`Changed`] event carrying the previous and current versions. Events
//! are delivered at least once; consumers must tolerate replays.

use crate::connection::Connection;
use crate::topology::{Flow, Link, Node, Port};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    pub fn is_delete(&self) -> bool {
        matches!(self, Action::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Topology object kinds a component can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Node,
    Port,
    Link,
    Flow,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [EventKind::Node, EventKind::Port, EventKind::Link, EventKind::Flow];

    /// Event name as published on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Node => "NodeChanged",
            EventKind::Port => "PortChanged",
            EventKind::Link => "LinkChanged",
            EventKind::Flow => "FlowChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one topology object in one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changed<T> {
    pub action: Action,
    /// Id of the publishing network.
    pub network_id: String,
    pub prev: Option<T>,
    pub curr: Option<T>,
}

impl<T> Changed<T> {
    pub fn add(network_id: impl Into<String>, curr: T) -> Self {
        Self {
            action: Action::Add,
            network_id: network_id.into(),
            prev: None,
            curr: Some(curr),
        }
    }

    pub fn update(network_id: impl Into<String>, prev: T, curr: T) -> Self {
        Self {
            action: Action::Update,
            network_id: network_id.into(),
            prev: Some(prev),
            curr: Some(curr),
        }
    }

    pub fn delete(network_id: impl Into<String>, prev: T) -> Self {
        Self {
            action: Action::Delete,
            network_id: network_id.into(),
            prev: Some(prev),
            curr: None,
        }
    }

    /// The object this event is about: `curr` for add/update, `prev` for delete.
    pub fn object(&self) -> Option<&T> {
        match self.action {
            Action::Delete => self.prev.as_ref(),
            Action::Add | Action::Update => self.curr.as_ref(),
        }
    }
}

/// A connection descriptor was added, updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionChanged {
    pub action: Action,
    pub prev: Option<Connection>,
    pub curr: Option<Connection>,
}

impl ConnectionChanged {
    pub fn add(curr: Connection) -> Self {
        Self {
            action: Action::Add,
            prev: None,
            curr: Some(curr),
        }
    }

    pub fn update(prev: Connection, curr: Connection) -> Self {
        Self {
            action: Action::Update,
            prev: Some(prev),
            curr: Some(curr),
        }
    }

    pub fn delete(prev: Connection) -> Self {
        Self {
            action: Action::Delete,
            prev: Some(prev),
            curr: None,
        }
    }
}

/// Any event a component may receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ConnectionChanged(ConnectionChanged),
    NodeChanged(Changed<Node>),
    PortChanged(Changed<Port>),
    LinkChanged(Changed<Link>),
    FlowChanged(Changed<Flow>),
}

impl Event {
    /// Topology kind, or `None` for connection events.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Event::ConnectionChanged(_) => None,
            Event::NodeChanged(_) => Some(EventKind::Node),
            Event::PortChanged(_) => Some(EventKind::Port),
            Event::LinkChanged(_) => Some(EventKind::Link),
            Event::FlowChanged(_) => Some(EventKind::Flow),
        }
    }

    /// Publishing network, or `None` for connection events.
    pub fn network_id(&self) -> Option<&str> {
        match self {
            Event::ConnectionChanged(_) => None,
            Event::NodeChanged(e) => Some(&e.network_id),
            Event::PortChanged(e) => Some(&e.network_id),
            Event::LinkChanged(e) => Some(&e.network_id),
            Event::FlowChanged(e) => Some(&e.network_id),
        }
    }
}
