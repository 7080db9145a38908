//! Link Layerizer - multi-layer link projection for SDN orchestration.
//!
//! The layerizer sits between three networks and keeps them consistent:
//! flows provisioned in a lower (transport) network appear as links in a
//! layerized network, those links are cloned into the upper network, and
//! links requested in the layerized network drive flow provisioning below.
//!
//! ```text
//! [collaborators] ──events──> [LayerizerDaemon] ──> [LinkLayerizer] ──writes──> [networks]
//!                                   ▲                                               │
//!                                   └──────────── subscribed change events ─────────┘
//! ```
//!
//! # Key Components
//!
//! - [`layerizer::LinkLayerizer`]: the engine (role registration, boundary
//!   table, flow/link index, projection handlers)
//! - [`daemon::LayerizerDaemon`]: single-consumer event loop hosting the engine
//! - [`config::LayerizerConfig`]: TOML configuration
//! - [`audit`]: structured audit records and logging setup
//!
//! The `linklayerizer` binary hosts the daemon over the in-memory
//! collaborators and has no transport of its own. Embedders with a real
//! message bus feed events and requests through [`daemon::DaemonHandle`].

pub mod audit;
pub mod config;
pub mod daemon;
pub mod error;
pub mod layerizer;

pub use config::LayerizerConfig;
pub use daemon::{DaemonHandle, LayerizerDaemon, LayerizerDaemonConfig};
pub use error::{ConfigError, DaemonError, LayerizerError, Result};
pub use layerizer::{Boundary, LayerizerContext, LinkLayerizer, LinkLayerizerConfig, Role};
