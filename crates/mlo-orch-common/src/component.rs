//! Base component trait.

use crate::event::Event;
use crate::message::{Request, Response};

/// A logic component driven by events and requests.
///
/// The hosting daemon delivers at most one event or request at a time and
/// waits for the handler to return before delivering the next one, so
/// implementations need no internal locking. Handlers must not fail past
/// their own boundary: errors are logged and the step abandoned, and request
/// errors become a rejected-request [`Response`].
///
/// # Lifecycle
///
/// 1. Construction with an explicit context of collaborators
/// 2. Connection events bind the component to its networks
/// 3. Topology events and requests are handled one by one
/// 4. `on_timer()` is called periodically for housekeeping
pub trait Component: Send {
    /// Component id, matched against the logic id of connection descriptors.
    fn component_id(&self) -> &str;

    /// Component type name (for logging).
    fn component_type(&self) -> &str;

    /// Handles one inbound event to completion.
    fn handle_event(&mut self, event: Event);

    /// Handles one inbound request to completion.
    fn handle_request(&mut self, request: &Request) -> Response;

    /// Called periodically by the hosting daemon.
    fn on_timer(&mut self) {
        // Default: no-op
    }

    /// Human-readable state summary for debugging.
    fn dump_state(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Changed, Event};
    use crate::message::Status;
    use crate::topology::Node;
    use serde_json::json;

    struct CountingComponent {
        events: usize,
    }

    impl Component for CountingComponent {
        fn component_id(&self) -> &str {
            "counter"
        }

        fn component_type(&self) -> &str {
            "CountingComponent"
        }

        fn handle_event(&mut self, _event: Event) {
            self.events += 1;
        }

        fn handle_request(&mut self, _request: &Request) -> Response {
            Response::ok(json!(self.events))
        }
    }

    #[test]
    fn test_component_trait() {
        let mut component = CountingComponent { events: 0 };
        component.handle_event(Event::NodeChanged(Changed::add("nw1", Node::new("N1"))));
        component.on_timer();

        let response = component.handle_request(&Request::get("count"));
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, json!(1));
        assert!(component.dump_state().is_empty());
    }
}
