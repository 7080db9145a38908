//! Layerizer types and data structures.

use mlo_orch_common::{attr, Action, FlowStatus};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Component type name reported by the engine.
pub const COMPONENT_TYPE: &str = "LinkLayerizer";

/// Owner stamped on flows synthesized from layerizer links.
pub const SYNTHESIZED_FLOW_OWNER: &str = "Any";

/// Attributes every subscription is filtered to.
pub const SUBSCRIBED_ATTRIBUTES: [&str; 8] = [
    attr::OPER_STATUS,
    attr::BANDWIDTH,
    attr::REQ_BANDWIDTH,
    attr::LATENCY,
    attr::REQ_LATENCY,
    attr::ESTABLISHMENT_STATUS,
    attr::TRANSACTION_ID,
    "status",
];

/// Role a network plays for the layerizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Service-facing network that consumes projected links.
    Upper,
    /// Transport network whose flows back the projected links.
    Lower,
    /// Network holding the projected links.
    Layerized,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Upper, Role::Lower, Role::Layerized];

    /// Connection-type wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Upper => "upper",
            Role::Lower => "lower",
            Role::Layerized => "layerized",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upper" => Ok(Role::Upper),
            "lower" => Ok(Role::Lower),
            "layerized" => Ok(Role::Layerized),
            _ => Err(format!("unknown connection type: {}", s)),
        }
    }
}

/// Node and port on one side of a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub node_id: String,
    pub port_id: String,
}

impl PortRef {
    pub fn new(node_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            port_id: port_id.into(),
        }
    }
}

/// Declared equivalence between a lower-side and an upper-side attachment
/// point.
///
/// Decoding is strict: a `type` field is accepted and ignored, any other
/// unknown field is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BoundaryWire")]
pub struct Boundary {
    pub boundary_id: String,
    pub lower_nw: String,
    pub lower_nw_node: String,
    pub lower_nw_port: String,
    pub upper_nw: String,
    pub upper_nw_node: String,
    pub upper_nw_port: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BoundaryWire {
    #[serde(default)]
    boundary_id: String,
    lower_nw: String,
    lower_nw_node: String,
    lower_nw_port: String,
    upper_nw: String,
    upper_nw_node: String,
    upper_nw_port: String,
    #[serde(rename = "type", default)]
    _type: Option<IgnoredAny>,
}

impl From<BoundaryWire> for Boundary {
    fn from(wire: BoundaryWire) -> Self {
        Self {
            boundary_id: wire.boundary_id,
            lower_nw: wire.lower_nw,
            lower_nw_node: wire.lower_nw_node,
            lower_nw_port: wire.lower_nw_port,
            upper_nw: wire.upper_nw,
            upper_nw_node: wire.upper_nw_node,
            upper_nw_port: wire.upper_nw_port,
        }
    }
}

impl Boundary {
    pub fn new(
        boundary_id: impl Into<String>,
        lower_nw: impl Into<String>,
        lower: PortRef,
        upper_nw: impl Into<String>,
        upper: PortRef,
    ) -> Self {
        Self {
            boundary_id: boundary_id.into(),
            lower_nw: lower_nw.into(),
            lower_nw_node: lower.node_id,
            lower_nw_port: lower.port_id,
            upper_nw: upper_nw.into(),
            upper_nw_node: upper.node_id,
            upper_nw_port: upper.port_id,
        }
    }

    pub fn lower(&self) -> PortRef {
        PortRef::new(&self.lower_nw_node, &self.lower_nw_port)
    }

    pub fn upper(&self) -> PortRef {
        PortRef::new(&self.upper_nw_node, &self.upper_nw_port)
    }
}

/// What the engine does with one flow change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTransition {
    /// Create or promote the layerizer link backed by a lower flow.
    ProjectToLink,
    /// Delete the layerizer link backed by a deleted lower flow.
    RetractLink,
    /// Copy a layerizer flow into the upper network.
    MirrorToUpper,
    /// Delete the upper copy of a deleted layerizer flow.
    RetractUpper,
    /// Transition deliberately dropped (re-announce of an established flow).
    Suppress,
    /// Not relevant to this role.
    Ignore,
}

impl FlowTransition {
    /// Per-role transition table for flow events.
    ///
    /// - upper: every change is ignored
    /// - lower: add projects an establishing/established flow; an update
    ///   re-announcing an established flow is suppressed, any other update
    ///   behaves like add; delete retracts the backing link
    /// - layerized: add/update mirror into upper; delete retracts the copy
    pub fn classify(
        role: Role,
        action: Action,
        prev: Option<FlowStatus>,
        curr: Option<FlowStatus>,
    ) -> Self {
        match (role, action) {
            (Role::Upper, _) => FlowTransition::Ignore,
            (Role::Layerized, Action::Delete) => FlowTransition::RetractUpper,
            (Role::Layerized, Action::Add | Action::Update) => FlowTransition::MirrorToUpper,
            (Role::Lower, Action::Delete) => FlowTransition::RetractLink,
            (Role::Lower, Action::Add) => Self::project_if_active(curr),
            (Role::Lower, Action::Update) => match (prev, curr) {
                (
                    Some(FlowStatus::Established),
                    Some(FlowStatus::Establishing | FlowStatus::Established),
                ) => FlowTransition::Suppress,
                _ => Self::project_if_active(curr),
            },
        }
    }

    fn project_if_active(status: Option<FlowStatus>) -> Self {
        match status {
            Some(FlowStatus::Establishing | FlowStatus::Established) => FlowTransition::ProjectToLink,
            Some(FlowStatus::None | FlowStatus::Teardown) | None => FlowTransition::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_role_wire_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(serde_json::to_value(Role::Layerized).unwrap(), json!("layerized"));
        assert!("layerizer".parse::<Role>().is_err());
    }

    #[test]
    fn test_boundary_decode_ignores_type() {
        let boundary: Boundary = serde_json::from_value(json!({
            "type": "LinkLayerizerBoundary",
            "boundary_id": "b1",
            "lower_nw": "nw2",
            "lower_nw_node": "N1",
            "lower_nw_port": "P1",
            "upper_nw": "nw1",
            "upper_nw_node": "N11",
            "upper_nw_port": "P1"
        }))
        .unwrap();

        assert_eq!(boundary.boundary_id, "b1");
        assert_eq!(boundary.lower(), PortRef::new("N1", "P1"));
        assert_eq!(boundary.upper(), PortRef::new("N11", "P1"));
    }

    #[test]
    fn test_boundary_decode_rejects_unknown_field() {
        let result: Result<Boundary, _> = serde_json::from_value(json!({
            "lower_nw": "nw2",
            "lower_nw_node": "N1",
            "lower_nw_port": "P1",
            "upper_nw": "nw1",
            "upper_nw_node": "N11",
            "upper_nw_port": "P1",
            "color": "red"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_boundary_encode_has_no_type() {
        let boundary = Boundary::new("b1", "nw2", PortRef::new("N1", "P1"), "nw1", PortRef::new("N11", "P1"));
        let value = serde_json::to_value(&boundary).unwrap();
        assert!(value.get("type").is_none());
        assert_eq!(value["upper_nw_node"], json!("N11"));
    }

    #[test]
    fn test_lower_flow_transitions() {
        use FlowStatus::{Established, Establishing, Teardown};
        let lower = |action, prev, curr| FlowTransition::classify(Role::Lower, action, prev, curr);

        assert_eq!(lower(Action::Add, None, Some(Establishing)), FlowTransition::ProjectToLink);
        assert_eq!(lower(Action::Add, None, Some(Established)), FlowTransition::ProjectToLink);
        assert_eq!(lower(Action::Add, None, Some(Teardown)), FlowTransition::Ignore);
        assert_eq!(
            lower(Action::Update, Some(Establishing), Some(Established)),
            FlowTransition::ProjectToLink
        );
        assert_eq!(
            lower(Action::Update, Some(Established), Some(Established)),
            FlowTransition::Suppress
        );
        assert_eq!(
            lower(Action::Update, Some(Established), Some(Teardown)),
            FlowTransition::Ignore
        );
        assert_eq!(lower(Action::Delete, Some(Established), None), FlowTransition::RetractLink);
    }

    #[test]
    fn test_other_role_transitions() {
        let status = Some(FlowStatus::Establishing);
        assert_eq!(
            FlowTransition::classify(Role::Upper, Action::Delete, status, None),
            FlowTransition::Ignore
        );
        assert_eq!(
            FlowTransition::classify(Role::Layerized, Action::Update, status, status),
            FlowTransition::MirrorToUpper
        );
        assert_eq!(
            FlowTransition::classify(Role::Layerized, Action::Delete, status, None),
            FlowTransition::RetractUpper
        );
    }
}
