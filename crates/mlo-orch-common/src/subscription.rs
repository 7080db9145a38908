//! Filtered event subscriptions.
//!
//! A component keeps one [`EventSubscription`] describing which change
//! events it wants from which networks. Update events are further filtered
//! to an explicit attribute list; the subscription is pushed to the
//! dispatcher through a [`SubscriptionSink`](crate::SubscriptionSink).

use crate::event::EventKind;
use std::collections::BTreeMap;

/// Set of (event kind, publishing network) filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSubscription {
    filters: BTreeMap<(EventKind, String), Vec<String>>,
}

impl EventSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Adds a filter. An existing filter for the same pair keeps its
    /// attributes and gains any new ones.
    pub fn add_filter<I, S>(&mut self, kind: EventKind, network_id: &str, attributes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self
            .filters
            .entry((kind, network_id.to_string()))
            .or_default();
        for attribute in attributes {
            let attribute = attribute.into();
            if !entry.contains(&attribute) {
                entry.push(attribute);
            }
        }
    }

    /// Replaces the attribute list of a filter, creating it if absent.
    pub fn update_filter<I, S>(&mut self, kind: EventKind, network_id: &str, attributes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.insert(
            (kind, network_id.to_string()),
            attributes.into_iter().map(Into::into).collect(),
        );
    }

    /// Removes one filter. Returns true if it existed.
    pub fn remove_filter(&mut self, kind: EventKind, network_id: &str) -> bool {
        self.filters
            .remove(&(kind, network_id.to_string()))
            .is_some()
    }

    /// Removes every filter for a network. Returns the number removed.
    pub fn remove_network(&mut self, network_id: &str) -> usize {
        let before = self.filters.len();
        self.filters.retain(|(_, nw), _| nw != network_id);
        before - self.filters.len()
    }

    pub fn is_subscribed(&self, kind: EventKind, network_id: &str) -> bool {
        self.filters.contains_key(&(kind, network_id.to_string()))
    }

    /// Attribute filter of a subscription, if subscribed.
    pub fn attributes(&self, kind: EventKind, network_id: &str) -> Option<&[String]> {
        self.filters
            .get(&(kind, network_id.to_string()))
            .map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, &str, &[String])> {
        self.filters
            .iter()
            .map(|((kind, nw), attrs)| (*kind, nw.as_str(), attrs.as_slice()))
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_filter_merges_attributes() {
        let mut sub = EventSubscription::new();
        sub.add_filter(EventKind::Link, "nw1", ["bandwidth", "latency"]);
        sub.add_filter(EventKind::Link, "nw1", ["latency", "oper_status"]);

        assert_eq!(sub.len(), 1);
        assert_eq!(
            sub.attributes(EventKind::Link, "nw1").unwrap(),
            &["bandwidth", "latency", "oper_status"]
        );
    }

    #[test]
    fn test_update_filter_replaces() {
        let mut sub = EventSubscription::new();
        sub.add_filter(EventKind::Flow, "nw1", ["status"]);
        sub.update_filter(EventKind::Flow, "nw1", ["bandwidth"]);
        assert_eq!(sub.attributes(EventKind::Flow, "nw1").unwrap(), &["bandwidth"]);
    }

    #[test]
    fn test_remove_network() {
        let mut sub = EventSubscription::new();
        for kind in EventKind::ALL {
            sub.add_filter(kind, "nw1", ["status"]);
            sub.add_filter(kind, "nw2", ["status"]);
        }
        assert_eq!(sub.remove_network("nw1"), 4);
        assert!(!sub.is_subscribed(EventKind::Node, "nw1"));
        assert!(sub.is_subscribed(EventKind::Node, "nw2"));
        assert!(sub.remove_filter(EventKind::Node, "nw2"));
        assert!(!sub.remove_filter(EventKind::Node, "nw2"));
    }
}
