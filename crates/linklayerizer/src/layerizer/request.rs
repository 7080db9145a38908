//! Request routing: boundary CRUD and index introspection.

use mlo_orch_common::{Method, Request, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::orch::LinkLayerizer;
use super::types::Boundary;
use crate::error::{LayerizerError, Result};

impl LinkLayerizer {
    /// Handles one request to completion.
    ///
    /// | Method | Path | Body |
    /// |---|---|---|
    /// | GET | `settings/boundaries` | all boundaries |
    /// | GET | `settings/boundaries/{id}` | one boundary, 404 if absent |
    /// | POST | `settings/boundaries` | stored boundary (id assigned if empty) |
    /// | PUT | `settings/boundaries/{id}` | stored boundary |
    /// | DELETE | `settings/boundaries/{id}` | removed boundary or null |
    /// | GET | `lower_flows` | link id -> flow ids |
    /// | GET | `lower_flows/{link_id}` | flow ids, or "" |
    /// | GET | `layerized_links` | flow id -> link id |
    /// | GET | `layerized_links/{flow_id}` | link id, or null |
    pub(crate) fn dispatch_request(&mut self, request: &Request) -> Response {
        debug!(method = %request.method, path = %request.path, "request");
        let segments = request.segments();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["settings", "boundaries"]) => json_response(self.boundaries.all()),
            (Method::Get, ["settings", "boundaries", id]) => match self.boundaries.get(id) {
                Some(boundary) => json_response(boundary),
                None => Response::not_found(),
            },
            (Method::Post, ["settings", "boundaries"]) => match request.decode_body::<Boundary>() {
                Ok(boundary) => boundary_response(self.create_boundary(boundary)),
                Err(e) => self.reject(request, &e.to_string()),
            },
            (Method::Put, ["settings", "boundaries", id]) => {
                match request.decode_body::<Boundary>() {
                    Ok(mut boundary) => {
                        boundary.boundary_id = id.to_string();
                        boundary_response(self.put_boundary(boundary))
                    }
                    Err(e) => self.reject(request, &e.to_string()),
                }
            }
            (Method::Delete, ["settings", "boundaries", id]) => match self.delete_boundary(id) {
                Some(removed) => json_response(&removed),
                None => Response::ok(Value::Null),
            },
            (Method::Get, ["lower_flows"]) => json_response(self.index.lower_flows()),
            (Method::Get, ["lower_flows", link_id]) => {
                let flows = self.index.flows_for(link_id);
                if flows.is_empty() {
                    Response::ok(Value::String(String::new()))
                } else {
                    json_response(&flows)
                }
            }
            (Method::Get, ["layerized_links"]) => json_response(self.index.layerized_links()),
            (Method::Get, ["layerized_links", flow_id]) => match self.index.link_for(flow_id) {
                Some(link_id) => Response::ok(Value::String(link_id.to_string())),
                None => Response::ok(Value::Null),
            },
            _ => self.reject(request, "unsupported request"),
        }
    }

    fn reject(&mut self, request: &Request, reason: &str) -> Response {
        self.stats.requests_rejected += 1;
        warn!(method = %request.method, path = %request.path, reason, "rejecting request");
        Response::bad_request(format!("{} {}: {}", request.method, request.path, reason))
    }
}

fn json_response<T: Serialize + ?Sized>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(body) => Response::ok(body),
        Err(e) => Response::internal_error(e.to_string()),
    }
}

/// A boundary naming unbound networks is answered with an explanatory
/// string and an OK status.
fn boundary_response(result: Result<Boundary>) -> Response {
    match result {
        Ok(boundary) => json_response(&boundary),
        Err(e @ LayerizerError::UndefinedBoundary { .. }) => Response::ok(Value::String(e.to_string())),
        Err(e) => Response::internal_error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use crate::layerizer::{LayerizerContext, LinkLayerizer, LinkLayerizerConfig, PortRef};
    use mlo_orch_common::memory::{MemoryNetworkRegistry, MemorySubscriptionSink, MemorySystemManager};
    use mlo_orch_common::{Connection, Method, Request, Status};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    use super::Boundary;

    fn engine() -> LinkLayerizer {
        let context = LayerizerContext::new(
            Arc::new(MemorySystemManager::new()),
            Arc::new(MemoryNetworkRegistry::new()),
            Arc::new(MemorySubscriptionSink::new()),
        );
        let mut engine = LinkLayerizer::new(LinkLayerizerConfig::new("lz"), context);
        for (id, role, nw) in [("c1", "upper", "nw1"), ("c2", "lower", "nw2"), ("c3", "layerized", "nw3")] {
            assert!(engine.on_connection_added(Some(&Connection::logic_and_network(id, role, "lz", nw))));
        }
        engine
    }

    fn boundary_body() -> Value {
        json!({
            "lower_nw": "nw2",
            "lower_nw_node": "N1",
            "lower_nw_port": "P1",
            "upper_nw": "nw1",
            "upper_nw_node": "N11",
            "upper_nw_port": "P1"
        })
    }

    #[test]
    fn test_put_get_delete_boundary() {
        let mut engine = engine();
        let put = Request::new(Method::Put, "settings/boundaries/b1").with_body(boundary_body());
        let response = engine.dispatch_request(&put);
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body["boundary_id"], json!("b1"));

        let response = engine.dispatch_request(&Request::get("/settings/boundaries/b1"));
        assert_eq!(response.body["upper_nw_node"], json!("N11"));

        let response = engine.dispatch_request(&Request::get("settings/boundaries"));
        assert!(response.body.get("b1").is_some());

        let response = engine.dispatch_request(&Request::delete("settings/boundaries/b1"));
        assert_eq!(response.body["boundary_id"], json!("b1"));
        let response = engine.dispatch_request(&Request::delete("settings/boundaries/b1"));
        assert_eq!(response, mlo_orch_common::Response::ok(Value::Null));

        let response = engine.dispatch_request(&Request::get("settings/boundaries/b1"));
        assert_eq!(response.status, Status::NotFound);
    }

    #[test]
    fn test_post_assigns_id() {
        let mut engine = engine();
        let post = Request::new(Method::Post, "settings/boundaries").with_body(boundary_body());
        let response = engine.dispatch_request(&post);

        let id = response.body["boundary_id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(engine.boundaries().low_to_upper("N1", "P1"), Some(PortRef::new("N11", "P1")));
        assert!(engine.boundaries().get(&id).is_some());
    }

    #[test]
    fn test_put_mismatched_networks() {
        let mut engine = engine();
        let mut body = boundary_body();
        body["lower_nw"] = json!("nw9");
        let response = engine.dispatch_request(
            &Request::new(Method::Put, "settings/boundaries/b1").with_body(body),
        );

        assert_eq!(response.status, Status::Ok);
        assert!(response.body.as_str().unwrap().contains("Undefined Boundary."));
        assert!(engine.boundaries().is_empty());
    }

    #[test]
    fn test_bad_requests() {
        let mut engine = engine();
        let mut body = boundary_body();
        body["extra"] = json!(1);

        let undecodable = Request::new(Method::Put, "settings/boundaries/b1").with_body(body);
        assert_eq!(engine.dispatch_request(&undecodable).status, Status::BadRequest);
        let no_body = Request::new(Method::Post, "settings/boundaries");
        assert_eq!(engine.dispatch_request(&no_body).status, Status::BadRequest);
        let unknown = Request::get("settings/widgets");
        assert_eq!(engine.dispatch_request(&unknown).status, Status::BadRequest);
        let wrong_method = Request::new(Method::Post, "lower_flows");
        assert_eq!(engine.dispatch_request(&wrong_method).status, Status::BadRequest);
        assert_eq!(engine.stats().requests_rejected, 4);
    }

    #[test]
    fn test_index_introspection() {
        let mut engine = engine();
        engine.index.insert("L1", "F1");

        let response = engine.dispatch_request(&Request::get("lower_flows"));
        assert_eq!(response.body, json!({"L1": ["F1"]}));
        let response = engine.dispatch_request(&Request::get("lower_flows/L1"));
        assert_eq!(response.body, json!(["F1"]));
        let response = engine.dispatch_request(&Request::get("lower_flows/unknown"));
        assert_eq!(response.body, json!(""));

        let response = engine.dispatch_request(&Request::get("layerized_links"));
        assert_eq!(response.body, json!({"F1": "L1"}));
        let response = engine.dispatch_request(&Request::get("layerized_links/F1"));
        assert_eq!(response.body, json!("L1"));
        let response = engine.dispatch_request(&Request::get("layerized_links/unknown"));
        assert_eq!(response.body, Value::Null);
    }

    #[test]
    fn test_boundary_type_field_accepted() {
        let mut engine = engine();
        let mut body = boundary_body();
        body["type"] = json!("LinkLayerizerBoundary");
        let response = engine.dispatch_request(
            &Request::new(Method::Put, "settings/boundaries/b2").with_body(body),
        );
        let stored: Boundary = serde_json::from_value(response.body).unwrap();
        assert_eq!(stored.boundary_id, "b2");
    }
}
