//! Topology model shared by every network component.
//!
//! Nodes, ports, links and flows are plain serde types. Ids are structured
//! strings such as `NW=SDN,NE=FW1,Layer=OCh,TTP=1`; the node owning a port is
//! named by the first two comma-delimited segments of the port id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Free-form attribute map carried by every topology object.
pub type Attributes = BTreeMap<String, String>;

/// Attribute keys understood by the layering pipelines.
pub mod attr {
    pub const BANDWIDTH: &str = "bandwidth";
    pub const REQ_BANDWIDTH: &str = "req_bandwidth";
    pub const LATENCY: &str = "latency";
    pub const REQ_LATENCY: &str = "req_latency";
    pub const ESTABLISHMENT_STATUS: &str = "establishment_status";
    pub const OPER_STATUS: &str = "oper_status";
    pub const TRANSACTION_ID: &str = "transaction_id";

    /// `oper_status` value for a usable link.
    pub const OPER_STATUS_UP: &str = "UP";

    /// Attributes copied verbatim between a lower flow and its layerized link.
    pub const PROJECTED: [&str; 5] = [BANDWIDTH, REQ_BANDWIDTH, LATENCY, REQ_LATENCY, TRANSACTION_ID];
}

/// Initial version string of a freshly created object.
pub const INITIAL_VERSION: &str = "0";

/// Returns the node id owning `port_id`, or `None` when the id has fewer
/// than two segments.
pub fn node_id_of_port(port_id: &str) -> Option<String> {
    let mut segments = port_id.split(',');
    let nw = segments.next().filter(|s| !s.is_empty())?;
    let ne = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("{},{}", nw, ne))
}

/// A topology object failed its structural check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{object} has empty {field}")]
    EmptyField {
        object: &'static str,
        field: &'static str,
    },

    #[error("flow has no match")]
    NoMatch,

    #[error("flow has no edge action")]
    NoEdgeAction,
}

fn require(value: &str, object: &'static str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::EmptyField { object, field })
    } else {
        Ok(())
    }
}

/// A port attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub port_id: String,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_link: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "initial_version")]
    pub version: String,
}

impl Port {
    pub fn new(node_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            port_id: port_id.into(),
            node_id: node_id.into(),
            out_link: None,
            in_link: None,
            attributes: Attributes::new(),
            version: initial_version(),
        }
    }
}

/// A network element and its ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    #[serde(default)]
    pub ports: BTreeMap<String, Port>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "initial_version")]
    pub version: String,
}

impl Node {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ports: BTreeMap::new(),
            attributes: Attributes::new(),
            version: initial_version(),
        }
    }

    /// Adds a port, rewriting its `node_id` to this node.
    pub fn with_port(mut self, port_id: impl Into<String>) -> Self {
        let port = Port::new(self.node_id.clone(), port_id);
        self.ports.insert(port.port_id.clone(), port);
        self
    }
}

/// A directed edge between two ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub link_id: String,
    pub src_node: String,
    pub src_port: String,
    pub dst_node: String,
    pub dst_port: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "initial_version")]
    pub version: String,
}

impl Link {
    pub fn new(
        link_id: impl Into<String>,
        src_node: impl Into<String>,
        src_port: impl Into<String>,
        dst_node: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> Self {
        Self {
            link_id: link_id.into(),
            src_node: src_node.into(),
            src_port: src_port.into(),
            dst_node: dst_node.into(),
            dst_port: dst_port.into(),
            attributes: Attributes::new(),
            version: initial_version(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.link_id, "link", "link_id")?;
        require(&self.src_node, "link", "src_node")?;
        require(&self.src_port, "link", "src_port")?;
        require(&self.dst_node, "link", "dst_node")?;
        require(&self.dst_port, "link", "dst_port")
    }
}

/// Lifecycle of a lower-layer path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    #[default]
    None,
    Establishing,
    Established,
    Teardown,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::None => "none",
            FlowStatus::Establishing => "establishing",
            FlowStatus::Established => "established",
            FlowStatus::Teardown => "teardown",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FlowStatus::None),
            "establishing" => Ok(FlowStatus::Establishing),
            "established" => Ok(FlowStatus::Established),
            "teardown" => Ok(FlowStatus::Teardown),
            _ => Err(format!("unknown flow status: {}", s)),
        }
    }
}

/// Ingress condition of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub in_node: String,
    pub in_port: String,
}

impl FlowMatch {
    pub fn new(in_node: impl Into<String>, in_port: impl Into<String>) -> Self {
        Self {
            in_node: in_node.into(),
            in_port: in_port.into(),
        }
    }
}

/// Output action at an edge node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowAction {
    pub output: String,
}

/// A lower-layer path object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub status: FlowStatus,
    #[serde(default)]
    pub matches: Vec<FlowMatch>,
    #[serde(default)]
    pub path: Vec<String>,
    /// Edge node id -> output actions at that node.
    #[serde(default)]
    pub edge_actions: BTreeMap<String, Vec<FlowAction>>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "initial_version")]
    pub version: String,
}

impl Flow {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            owner: String::new(),
            enabled: true,
            priority: 0,
            status: FlowStatus::None,
            matches: Vec::new(),
            path: Vec::new(),
            edge_actions: BTreeMap::new(),
            attributes: Attributes::new(),
            version: initial_version(),
        }
    }

    pub fn with_match(mut self, in_node: impl Into<String>, in_port: impl Into<String>) -> Self {
        self.matches.push(FlowMatch::new(in_node, in_port));
        self
    }

    pub fn with_edge_action(mut self, node: impl Into<String>, output: impl Into<String>) -> Self {
        self.edge_actions
            .entry(node.into())
            .or_default()
            .push(FlowAction {
                output: output.into(),
            });
        self
    }

    pub fn with_status(mut self, status: FlowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Every (node, output port) pair across all edge actions.
    pub fn edge_targets(&self) -> Vec<(&str, &str)> {
        self.edge_actions
            .iter()
            .flat_map(|(node, actions)| {
                actions
                    .iter()
                    .map(move |action| (node.as_str(), action.output.as_str()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.flow_id, "flow", "flow_id")?;
        if self.matches.is_empty() {
            return Err(ValidationError::NoMatch);
        }
        for m in &self.matches {
            require(&m.in_node, "flow match", "in_node")?;
            require(&m.in_port, "flow match", "in_port")?;
        }
        let targets = self.edge_targets();
        if targets.is_empty() {
            return Err(ValidationError::NoEdgeAction);
        }
        for (node, port) in targets {
            require(node, "flow edge action", "node")?;
            require(port, "flow edge action", "output")?;
        }
        Ok(())
    }
}

/// Snapshot of every flow held by a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSet {
    #[serde(default)]
    pub flows: BTreeMap<String, Flow>,
}

fn initial_version() -> String {
    INITIAL_VERSION.to_string()
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_id_of_port() {
        assert_eq!(
            node_id_of_port("NW=SDN,NE=FW1,Layer=OCh,TTP=1"),
            Some("NW=SDN,NE=FW1".to_string())
        );
        assert_eq!(node_id_of_port("NW=SDN"), None);
        assert_eq!(node_id_of_port(""), None);
    }

    #[test]
    fn test_flow_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&FlowStatus::Establishing).unwrap(),
            "\"establishing\""
        );
        assert_eq!("teardown".parse::<FlowStatus>(), Ok(FlowStatus::Teardown));
        assert!("bogus".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn test_link_validate() {
        let link = Link::new("L1", "N1", "P1", "N2", "P2");
        assert!(link.validate().is_ok());

        let broken = Link::new("L1", "N1", "", "N2", "P2");
        assert_eq!(
            broken.validate(),
            Err(ValidationError::EmptyField {
                object: "link",
                field: "src_port"
            })
        );
    }

    #[test]
    fn test_flow_validate() {
        let flow = Flow::new("F1")
            .with_match("N1", "P1")
            .with_edge_action("N2", "P2");
        assert!(flow.validate().is_ok());

        assert_eq!(Flow::new("F1").validate(), Err(ValidationError::NoMatch));
        assert_eq!(
            Flow::new("F1").with_match("N1", "P1").validate(),
            Err(ValidationError::NoEdgeAction)
        );
    }

    #[test]
    fn test_edge_targets_flatten() {
        let flow = Flow::new("F1")
            .with_edge_action("N2", "P2")
            .with_edge_action("N2", "P3")
            .with_edge_action("N3", "P1");
        assert_eq!(
            flow.edge_targets(),
            vec![("N2", "P2"), ("N2", "P3"), ("N3", "P1")]
        );
    }

    #[test]
    fn test_flow_decode_defaults() {
        let flow: Flow = serde_json::from_str(r#"{"flow_id":"F1"}"#).unwrap();
        assert!(flow.enabled);
        assert_eq!(flow.status, FlowStatus::None);
        assert_eq!(flow.version, "0");
    }
}
