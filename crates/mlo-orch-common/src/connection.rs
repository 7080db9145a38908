//! Component connection descriptors.
//!
//! A connection binds a logic component (such as the link layerizer) to a
//! network component under a declared connection type. The system manager
//! owns the descriptor; the logic publishes state transitions back to it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object type carried by a logic-to-network connection descriptor.
pub const LOGIC_AND_NETWORK: &str = "LogicAndNetwork";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Initializing,
    Running,
    Error,
    Finalizing,
    None,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Running => "running",
            ConnectionState::Error => "error",
            ConnectionState::Finalizing => "finalizing",
            ConnectionState::None => "none",
        };
        f.write_str(s)
    }
}

/// Logic-to-network connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub connection_type: String,
    #[serde(default)]
    pub state: ConnectionState,
    pub logic_id: String,
    pub network_id: String,
}

impl Connection {
    /// Creates a `LogicAndNetwork` descriptor in the initializing state.
    pub fn logic_and_network(
        id: impl Into<String>,
        connection_type: impl Into<String>,
        logic_id: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object_type: LOGIC_AND_NETWORK.to_string(),
            connection_type: connection_type.into(),
            state: ConnectionState::Initializing,
            logic_id: logic_id.into(),
            network_id: network_id.into(),
        }
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_wire_shape() {
        let conn = Connection::logic_and_network("c1", "upper", "lz1", "nw-upper");
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json["type"], "LogicAndNetwork");
        assert_eq!(json["state"], "initializing");
        assert_eq!(json["connection_type"], "upper");
    }

    #[test]
    fn test_with_state() {
        let conn = Connection::logic_and_network("c1", "lower", "lz1", "nw-lower")
            .with_state(ConnectionState::Running);
        assert_eq!(conn.state, ConnectionState::Running);
        assert_eq!(conn.state.to_string(), "running");
    }
}
