//! Flow/link index.

use serde::Serialize;
use std::collections::BTreeMap;

/// Bidirectional mapping between layerizer links and the lower flows that
/// back them.
///
/// The forward view (`lower_flows`, link -> flows) and the backward view
/// (`layerized_links`, flow -> link) are only mutated together, so
/// `flow in lower_flows[link]` holds exactly when `layerized_links[flow] ==
/// link`. A link entry is dropped once its flow list is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowLinkIndex {
    lower_flows: BTreeMap<String, Vec<String>>,
    layerized_links: BTreeMap<String, String>,
}

impl FlowLinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed flows.
    pub fn len(&self) -> usize {
        self.layerized_links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layerized_links.is_empty()
    }

    pub fn lower_flows(&self) -> &BTreeMap<String, Vec<String>> {
        &self.lower_flows
    }

    pub fn layerized_links(&self) -> &BTreeMap<String, String> {
        &self.layerized_links
    }

    /// Flows backing `link_id`; empty if none.
    pub fn flows_for(&self, link_id: &str) -> &[String] {
        self.lower_flows
            .get(link_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn link_for(&self, flow_id: &str) -> Option<&str> {
        self.layerized_links.get(flow_id).map(String::as_str)
    }

    /// Records that `flow_id` backs `link_id`. A flow previously mapped to
    /// another link is moved. Returns false if the pair was already present.
    pub fn insert(&mut self, link_id: &str, flow_id: &str) -> bool {
        match self.link_for(flow_id) {
            Some(current) if current == link_id => return false,
            Some(_) => {
                self.remove_flow(flow_id);
            }
            None => {}
        }
        self.lower_flows
            .entry(link_id.to_string())
            .or_default()
            .push(flow_id.to_string());
        self.layerized_links
            .insert(flow_id.to_string(), link_id.to_string());
        true
    }

    /// Unmaps one flow. Returns the link it backed.
    pub fn remove_flow(&mut self, flow_id: &str) -> Option<String> {
        let link_id = self.layerized_links.remove(flow_id)?;
        if let Some(flows) = self.lower_flows.get_mut(&link_id) {
            flows.retain(|f| f != flow_id);
            if flows.is_empty() {
                self.lower_flows.remove(&link_id);
            }
        }
        Some(link_id)
    }

    /// Unmaps a link and every flow backing it. Returns those flows.
    pub fn remove_link(&mut self, link_id: &str) -> Vec<String> {
        let flows = self.lower_flows.remove(link_id).unwrap_or_default();
        for flow_id in &flows {
            self.layerized_links.remove(flow_id);
        }
        flows
    }

    pub fn clear(&mut self) {
        self.lower_flows.clear();
        self.layerized_links.clear();
    }

    /// Checks that both views describe the same pairs.
    pub fn is_consistent(&self) -> bool {
        let forward_pairs: usize = self.lower_flows.values().map(Vec::len).sum();
        forward_pairs == self.layerized_links.len()
            && self.lower_flows.iter().all(|(link_id, flows)| {
                !flows.is_empty()
                    && flows
                        .iter()
                        .all(|f| self.link_for(f) == Some(link_id.as_str()))
            })
    }
}
