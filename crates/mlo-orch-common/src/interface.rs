//! Collaborator interfaces consumed by logic components.
//!
//! The transport behind these traits (RPC, message bus, in-process) is not
//! visible to the logic. Every call is synchronous request/response and
//! blocks the calling thread; deadlines are the transport's concern.

use crate::connection::Connection;
use crate::subscription::EventSubscription;
use crate::topology::{Flow, FlowSet, Link, Node, Port};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error returned by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    /// The target object does not exist.
    #[error("{kind} '{id}' not found in {network_id}")]
    NotFound {
        network_id: String,
        kind: &'static str,
        id: String,
    },

    /// The remote side answered with a failure status.
    #[error("{operation} on {target} failed with status {status}: {message}")]
    Status {
        operation: String,
        target: String,
        status: u16,
        message: String,
    },

    /// The request never reached the remote side.
    #[error("transport error: {0}")]
    Transport(String),

    /// Body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl InterfaceError {
    pub fn not_found(network_id: impl Into<String>, kind: &'static str, id: impl Into<String>) -> Self {
        InterfaceError::NotFound {
            network_id: network_id.into(),
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for InterfaceError {
    fn from(err: serde_json::Error) -> Self {
        InterfaceError::Serialization(err.to_string())
    }
}

/// Result type for collaborator calls.
pub type InterfaceResult<T> = Result<T, InterfaceError>;

/// CRUD access to the topology of one network component.
///
/// Getters return `Ok(None)` for a missing object. Deleting a missing object
/// succeeds without effect.
pub trait NetworkInterface: Send + Sync {
    /// Id of the network this interface talks to.
    fn network_id(&self) -> &str;

    fn get_nodes(&self) -> InterfaceResult<BTreeMap<String, Node>>;
    fn get_node(&self, node_id: &str) -> InterfaceResult<Option<Node>>;
    fn put_node(&self, node: &Node) -> InterfaceResult<()>;
    fn del_node(&self, node_id: &str) -> InterfaceResult<()>;

    fn get_port(&self, node_id: &str, port_id: &str) -> InterfaceResult<Option<Port>>;
    fn put_port(&self, port: &Port) -> InterfaceResult<()>;
    fn del_port(&self, node_id: &str, port_id: &str) -> InterfaceResult<()>;

    fn get_links(&self) -> InterfaceResult<BTreeMap<String, Link>>;
    fn get_link(&self, link_id: &str) -> InterfaceResult<Option<Link>>;
    fn put_link(&self, link: &Link) -> InterfaceResult<()>;
    fn del_link(&self, link_id: &str) -> InterfaceResult<()>;

    fn get_flow_set(&self) -> InterfaceResult<FlowSet>;
    fn get_flow(&self, flow_id: &str) -> InterfaceResult<Option<Flow>>;
    fn put_flow(&self, flow: &Flow) -> InterfaceResult<()>;
    fn del_flow(&self, flow_id: &str) -> InterfaceResult<()>;
}

/// Creates a [`NetworkInterface`] for a network id.
pub trait NetworkInterfaceFactory: Send + Sync {
    fn create(&self, network_id: &str) -> Box<dyn NetworkInterface>;
}

impl<F> NetworkInterfaceFactory for F
where
    F: Fn(&str) -> Box<dyn NetworkInterface> + Send + Sync,
{
    fn create(&self, network_id: &str) -> Box<dyn NetworkInterface> {
        self(network_id)
    }
}

/// Publishes connection state to the system manager.
pub trait SystemManagerInterface: Send + Sync {
    fn put_connection(&self, connection: &Connection) -> InterfaceResult<()>;
}

/// Installs a component's event subscription with the event dispatcher.
pub trait SubscriptionSink: Send + Sync {
    fn apply(&self, subscriber_id: &str, subscription: &EventSubscription) -> InterfaceResult<()>;
}
