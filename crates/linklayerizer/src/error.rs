//! Error types for the link layerizer

use crate::layerizer::Role;
use mlo_orch_common::{InterfaceError, ValidationError};
use thiserror::Error;

/// Failure of one engine step.
///
/// Handlers never let these escape: a failed step is logged and abandoned,
/// and the next event for the same object acts as the retry.
#[derive(Error, Debug)]
pub enum LayerizerError {
    /// Connection descriptor rejected by role registration
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Role already held by another network
    #[error("Role {role} already bound to {bound}, rejecting {network_id}")]
    RoleAlreadyBound {
        role: Role,
        network_id: String,
        bound: String,
    },

    /// A step needs a network that has not joined yet
    #[error("Role {0} is not bound")]
    RoleNotBound(Role),

    /// Endpoint with no boundary mapping
    #[error("No boundary for node={node} port={port}")]
    NoBoundary { node: String, port: String },

    /// Flow fans out to more than one egress point
    #[error("Flow {flow_id} has {count} edge actions, expected 1")]
    MultipleEdgeActions { flow_id: String, count: usize },

    /// Derived link failed validation
    #[error("Invalid link: {0}")]
    InvalidLink(ValidationError),

    /// Flow (observed or derived) failed validation
    #[error("Invalid flow: {0}")]
    InvalidFlow(ValidationError),

    /// Boundary names networks other than the bound lower/upper pair
    #[error("Undefined Boundary. lower_nw={lower_nw} upper_nw={upper_nw} do not match the bound networks")]
    UndefinedBoundary { lower_nw: String, upper_nw: String },

    /// Unrecognized establishment status on a link
    #[error("Invalid establishment status: {0}")]
    InvalidStatus(String),

    /// Could not find an unused object id
    #[error("No free {0} id after repeated attempts")]
    IdExhausted(&'static str),

    /// Collaborator call failed
    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

/// Result type for engine steps
pub type Result<T> = std::result::Result<T, LayerizerError>;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File exists but is not valid TOML for this schema
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    /// Value out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors talking to a running daemon
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaemonError {
    /// The daemon loop has stopped
    #[error("Daemon inbound queue is closed")]
    Closed,

    /// Inbound queue at capacity
    #[error("Daemon inbound queue is full")]
    QueueFull,

    /// Request was accepted but never answered
    #[error("Daemon dropped the request without replying")]
    NoReply,
}
