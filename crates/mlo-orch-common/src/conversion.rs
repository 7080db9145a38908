//! Conversion table: role registry and entity-id translation.
//!
//! The table records which connection type each network was registered
//! under and, for networks wired together, which node/port/link/flow in one
//! network corresponds to which object in another. Every translation is
//! stored in both directions so either side can be looked up.
//!
//! Entries are only created by explicit `add_entry_*` calls; lookups never
//! create entries.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Node, link or flow id qualified by its network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub network_id: String,
    pub object_id: String,
}

impl ObjectKey {
    pub fn new(network_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            object_id: object_id.into(),
        }
    }
}

/// Port id qualified by its network and node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub network_id: String,
    pub node_id: String,
    pub port_id: String,
}

impl PortKey {
    pub fn new(
        network_id: impl Into<String>,
        node_id: impl Into<String>,
        port_id: impl Into<String>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            node_id: node_id.into(),
            port_id: port_id.into(),
        }
    }
}

trait Scoped {
    fn network_id(&self) -> &str;
}

impl Scoped for ObjectKey {
    fn network_id(&self) -> &str {
        &self.network_id
    }
}

impl Scoped for PortKey {
    fn network_id(&self) -> &str {
        &self.network_id
    }
}

impl Scoped for String {
    fn network_id(&self) -> &str {
        self
    }
}

/// Symmetric many-to-many translation map.
#[derive(Debug, Clone)]
struct TranslationMap<K> {
    entries: BTreeMap<K, BTreeSet<K>>,
}

impl<K: Ord + Clone + Scoped> TranslationMap<K> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn add(&mut self, a: K, b: K) {
        self.entries.entry(a.clone()).or_default().insert(b.clone());
        self.entries.entry(b).or_default().insert(a);
    }

    fn get(&self, key: &K) -> Vec<K> {
        self.entries
            .get(key)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&mut self, key: &K) -> Vec<K> {
        let Some(peers) = self.entries.remove(key) else {
            return Vec::new();
        };
        for peer in &peers {
            if let Some(back) = self.entries.get_mut(peer) {
                back.remove(key);
                if back.is_empty() {
                    self.entries.remove(peer);
                }
            }
        }
        peers.into_iter().collect()
    }

    fn remove_network(&mut self, network_id: &str) -> usize {
        let doomed: Vec<K> = self
            .entries
            .keys()
            .filter(|k| k.network_id() == network_id)
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Role registry plus id-translation tables.
#[derive(Debug, Clone)]
pub struct ConversionTable {
    connection_types: HashMap<String, String>,
    networks: TranslationMap<String>,
    nodes: TranslationMap<ObjectKey>,
    ports: TranslationMap<PortKey>,
    links: TranslationMap<ObjectKey>,
    flows: TranslationMap<ObjectKey>,
}

impl Default for ConversionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionTable {
    pub fn new() -> Self {
        Self {
            connection_types: HashMap::new(),
            networks: TranslationMap::new(),
            nodes: TranslationMap::new(),
            ports: TranslationMap::new(),
            links: TranslationMap::new(),
            flows: TranslationMap::new(),
        }
    }

    // ----- connection types -----

    pub fn add_entry_connection_type(&mut self, network_id: &str, connection_type: &str) {
        self.connection_types
            .insert(network_id.to_string(), connection_type.to_string());
    }

    pub fn del_entry_connection_type(&mut self, network_id: &str) -> Option<String> {
        self.connection_types.remove(network_id)
    }

    pub fn connection_type(&self, network_id: &str) -> Option<&str> {
        self.connection_types.get(network_id).map(String::as_str)
    }

    /// Networks registered under `connection_type`, sorted.
    pub fn connection_list(&self, connection_type: &str) -> Vec<String> {
        let mut list: Vec<String> = self
            .connection_types
            .iter()
            .filter(|(_, t)| t.as_str() == connection_type)
            .map(|(nw, _)| nw.clone())
            .collect();
        list.sort();
        list
    }

    // ----- networks -----

    pub fn add_entry_network(&mut self, a: &str, b: &str) {
        self.networks.add(a.to_string(), b.to_string());
    }

    pub fn networks(&self, network_id: &str) -> Vec<String> {
        self.networks.get(&network_id.to_string())
    }

    /// Drops every entry that involves `network_id`: the network edges and
    /// all node, port, link and flow translations scoped to it. Returns the
    /// number of entries removed from this network's side.
    pub fn del_entry_network(&mut self, network_id: &str) -> usize {
        self.networks.remove_network(network_id)
            + self.nodes.remove_network(network_id)
            + self.ports.remove_network(network_id)
            + self.links.remove_network(network_id)
            + self.flows.remove_network(network_id)
    }

    // ----- nodes -----

    pub fn add_entry_node(&mut self, nw_a: &str, node_a: &str, nw_b: &str, node_b: &str) {
        self.nodes
            .add(ObjectKey::new(nw_a, node_a), ObjectKey::new(nw_b, node_b));
    }

    pub fn node(&self, network_id: &str, node_id: &str) -> Vec<ObjectKey> {
        self.nodes.get(&ObjectKey::new(network_id, node_id))
    }

    pub fn del_entry_node(&mut self, network_id: &str, node_id: &str) -> Vec<ObjectKey> {
        self.nodes.remove(&ObjectKey::new(network_id, node_id))
    }

    // ----- ports -----

    pub fn add_entry_port(&mut self, a: PortKey, b: PortKey) {
        self.ports.add(a, b);
    }

    pub fn port(&self, network_id: &str, node_id: &str, port_id: &str) -> Vec<PortKey> {
        self.ports.get(&PortKey::new(network_id, node_id, port_id))
    }

    pub fn del_entry_port(&mut self, network_id: &str, node_id: &str, port_id: &str) -> Vec<PortKey> {
        self.ports.remove(&PortKey::new(network_id, node_id, port_id))
    }

    // ----- links -----

    pub fn add_entry_link(&mut self, nw_a: &str, link_a: &str, nw_b: &str, link_b: &str) {
        self.links
            .add(ObjectKey::new(nw_a, link_a), ObjectKey::new(nw_b, link_b));
    }

    pub fn link(&self, network_id: &str, link_id: &str) -> Vec<ObjectKey> {
        self.links.get(&ObjectKey::new(network_id, link_id))
    }

    pub fn del_entry_link(&mut self, network_id: &str, link_id: &str) -> Vec<ObjectKey> {
        self.links.remove(&ObjectKey::new(network_id, link_id))
    }

    // ----- flows -----

    pub fn add_entry_flow(&mut self, nw_a: &str, flow_a: &str, nw_b: &str, flow_b: &str) {
        self.flows
            .add(ObjectKey::new(nw_a, flow_a), ObjectKey::new(nw_b, flow_b));
    }

    pub fn flow(&self, network_id: &str, flow_id: &str) -> Vec<ObjectKey> {
        self.flows.get(&ObjectKey::new(network_id, flow_id))
    }

    pub fn del_entry_flow(&mut self, network_id: &str, flow_id: &str) -> Vec<ObjectKey> {
        self.flows.remove(&ObjectKey::new(network_id, flow_id))
    }

    /// Total number of translation keys held, for diagnostics.
    pub fn entry_count(&self) -> usize {
        self.networks.len() + self.nodes.len() + self.ports.len() + self.links.len() + self.flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_types() {
        let mut table = ConversionTable::new();
        table.add_entry_connection_type("nw2", "upper");
        table.add_entry_connection_type("nw1", "upper");
        table.add_entry_connection_type("nw3", "lower");

        assert_eq!(table.connection_type("nw3"), Some("lower"));
        assert_eq!(table.connection_list("upper"), vec!["nw1", "nw2"]);
        assert!(table.connection_list("layerized").is_empty());

        assert_eq!(table.del_entry_connection_type("nw1").as_deref(), Some("upper"));
        assert_eq!(table.connection_list("upper"), vec!["nw2"]);
    }

    #[test]
    fn test_lookup_never_creates() {
        let table = ConversionTable::new();
        assert!(table.node("nw1", "N1").is_empty());
        assert!(table.link("nw1", "L1").is_empty());
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn test_translation_is_bidirectional() {
        let mut table = ConversionTable::new();
        table.add_entry_link("lz", "L1", "up", "L1");

        assert_eq!(table.link("lz", "L1"), vec![ObjectKey::new("up", "L1")]);
        assert_eq!(table.link("up", "L1"), vec![ObjectKey::new("lz", "L1")]);

        table.del_entry_link("up", "L1");
        assert!(table.link("lz", "L1").is_empty());
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn test_del_entry_network_clears_scoped_objects() {
        let mut table = ConversionTable::new();
        table.add_entry_network("up", "lz");
        table.add_entry_node("up", "N1", "lz", "N1");
        table.add_entry_port(PortKey::new("up", "N1", "P1"), PortKey::new("lz", "N1", "P1"));
        table.add_entry_flow("lz", "F1", "up", "F1");
        table.add_entry_flow("lz", "F2", "other", "F2");

        table.del_entry_network("up");

        assert!(table.networks("lz").is_empty());
        assert!(table.node("lz", "N1").is_empty());
        assert!(table.port("lz", "N1", "P1").is_empty());
        assert!(table.flow("lz", "F1").is_empty());
        assert_eq!(table.flow("lz", "F2"), vec![ObjectKey::new("other", "F2")]);
    }
}
