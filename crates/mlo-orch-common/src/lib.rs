//! Common network-component abstractions for multi-layer orchestration.
//!
//! This crate provides the types and traits shared by logic components that
//! coordinate several network components:
//!
//! - [`topology`]: Node, Port, Link and Flow model
//! - [`Component`]: Base trait for event/request driven logic
//! - [`Event`]: Change events published by networks
//! - [`ConversionTable`]: Role registry and id translation between networks
//! - [`NetworkInterface`], [`SystemManagerInterface`], [`SubscriptionSink`]:
//!   collaborator seams
//! - [`memory`]: In-process implementations of the collaborators
//!
//! # Architecture
//!
//! Logic components follow an event-driven model:
//!
//! 1. The system manager connects the logic to networks (connection events)
//! 2. The logic subscribes to node/port/link/flow changes of those networks
//! 3. The hosting daemon delivers events one at a time
//! 4. The logic writes derived objects back through `NetworkInterface`
//!
//! # Example
//!
//! ```
//! use mlo_orch_common::{Changed, Event, MemoryNetwork, NetworkInterface, Node};
//! use mlo_orch_common::memory::EventRecorder;
//!
//! let recorder = EventRecorder::new();
//! let network = MemoryNetwork::new("nw1").with_sink(recorder.sink());
//! network.put_node(&Node::new("NW=SDN,NE=N1")).unwrap();
//!
//! let events = recorder.drain();
//! assert!(matches!(&events[0], Event::NodeChanged(Changed { .. })));
//! ```

pub mod component;
pub mod connection;
pub mod conversion;
pub mod event;
pub mod interface;
pub mod memory;
pub mod message;
pub mod subscription;
pub mod topology;

pub use component::Component;
pub use connection::{Connection, ConnectionState, LOGIC_AND_NETWORK};
pub use conversion::{ConversionTable, ObjectKey, PortKey};
pub use event::{Action, Changed, ConnectionChanged, Event, EventKind};
pub use interface::{
    InterfaceError, InterfaceResult, NetworkInterface, NetworkInterfaceFactory, SubscriptionSink,
    SystemManagerInterface,
};
pub use memory::MemoryNetwork;
pub use message::{Method, Request, Response, Status};
pub use subscription::EventSubscription;
pub use topology::{
    attr, node_id_of_port, Attributes, Flow, FlowAction, FlowMatch, FlowSet, FlowStatus, Link,
    Node, Port, ValidationError,
};
