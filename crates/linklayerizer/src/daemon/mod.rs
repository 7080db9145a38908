//! Daemon hosting the layerizer engine.

mod layerizer_daemon;

pub use layerizer_daemon::{
    channel, DaemonHandle, DaemonStats, Inbound, Inbox, LayerizerDaemon, LayerizerDaemonConfig,
};
