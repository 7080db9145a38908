//! Boundary table with hash indices on both sides.

use super::types::{Boundary, PortRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Keyed store of [`Boundary`] records.
///
/// Two side indices, (lower node, lower port) and (upper node, upper port),
/// are maintained on every insert, replace and remove so translation is a
/// hash lookup. When several boundaries share an endpoint the one with the
/// smallest id wins.
#[derive(Debug, Clone, Default)]
pub struct BoundarySet {
    boundaries: BTreeMap<String, Boundary>,
    by_lower: HashMap<PortRef, BTreeSet<String>>,
    by_upper: HashMap<PortRef, BTreeSet<String>>,
}

impl BoundarySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn get(&self, boundary_id: &str) -> Option<&Boundary> {
        self.boundaries.get(boundary_id)
    }

    pub fn all(&self) -> &BTreeMap<String, Boundary> {
        &self.boundaries
    }

    /// Inserts or replaces the boundary keyed by its `boundary_id`.
    /// Returns the replaced record.
    pub fn insert(&mut self, boundary: Boundary) -> Option<Boundary> {
        let id = boundary.boundary_id.clone();
        let replaced = self.remove(&id);
        Self::index(&mut self.by_lower, boundary.lower(), &id);
        Self::index(&mut self.by_upper, boundary.upper(), &id);
        self.boundaries.insert(id, boundary);
        replaced
    }

    pub fn remove(&mut self, boundary_id: &str) -> Option<Boundary> {
        let removed = self.boundaries.remove(boundary_id)?;
        Self::unindex(&mut self.by_lower, &removed.lower(), boundary_id);
        Self::unindex(&mut self.by_upper, &removed.upper(), boundary_id);
        Some(removed)
    }

    /// Upper-side endpoint paired with a lower-side (node, port).
    pub fn low_to_upper(&self, node_id: &str, port_id: &str) -> Option<PortRef> {
        self.lookup(&self.by_lower, node_id, port_id)
            .map(Boundary::upper)
    }

    /// Lower-side endpoint paired with an upper-side (node, port).
    pub fn upper_to_low(&self, node_id: &str, port_id: &str) -> Option<PortRef> {
        self.lookup(&self.by_upper, node_id, port_id)
            .map(Boundary::lower)
    }

    fn lookup(
        &self,
        side: &HashMap<PortRef, BTreeSet<String>>,
        node_id: &str,
        port_id: &str,
    ) -> Option<&Boundary> {
        side.get(&PortRef::new(node_id, port_id))
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.boundaries.get(id))
    }

    fn index(side: &mut HashMap<PortRef, BTreeSet<String>>, key: PortRef, id: &str) {
        side.entry(key).or_default().insert(id.to_string());
    }

    fn unindex(side: &mut HashMap<PortRef, BTreeSet<String>>, key: &PortRef, id: &str) {
        if let Some(ids) = side.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                side.remove(key);
            }
        }
    }
}
