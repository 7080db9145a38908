//! LinkLayerizer - multi-layer link projection.
//!
//! The layerizer binds three networks by role and keeps them consistent:
//!
//! ```text
//!   upper (nw1) <── cloned links ── layerized (nw3) <── mirrored nodes/ports ── upper
//!                                      ▲    │
//!                      projected links │    │ synthesized flows
//!                                      │    ▼
//!                                   lower (nw2)
//! ```
//!
//! - Lower flows that are establishing/established become layerizer links,
//!   their endpoints translated through the boundary table.
//! - Layerizer links are cloned into the upper network and, while not yet
//!   established, drive the state of their backing lower flows (synthesizing
//!   one when none exists).
//! - Deletes cascade along the same paths.
//!
//! Every mutation is idempotent, so a replayed event is harmless and the next
//! event acts as the retry for an abandoned step.

mod boundary;
mod index;
mod orch;
mod request;
mod types;

pub use boundary::BoundarySet;
pub use index::FlowLinkIndex;
pub use orch::{LayerizerContext, LinkLayerizer, LinkLayerizerConfig, LinkLayerizerStats};
pub use types::{
    Boundary, FlowTransition, PortRef, Role, COMPONENT_TYPE, SUBSCRIBED_ATTRIBUTES,
    SYNTHESIZED_FLOW_OWNER,
};
