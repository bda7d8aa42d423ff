//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by every [`crate::RuntimeClient`] call.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Kind of runtime object an error or operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Container image.
    Image,
    /// Container.
    Container,
    /// Network.
    Network,
}

impl ResourceKind {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Container => "container",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the runtime control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The referenced object does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing object.
        kind: ResourceKind,
        /// Identifier or name that was looked up.
        id: String,
    },
    /// A name is already taken by another object.
    #[error("{kind} name already in use: {name}")]
    Conflict {
        /// Kind of the colliding object.
        kind: ResourceKind,
        /// The contested name.
        name: String,
    },
    /// The container is not attached to the network.
    #[error("container {container} is not connected to network {network}")]
    NotConnected {
        /// Network identifier.
        network: String,
        /// Container identifier.
        container: String,
    },
    /// The runtime does not implement the requested operation.
    #[error("operation not supported by the runtime: {0}")]
    Unsupported(&'static str),
    /// The control plane answered with an unexpected status.
    #[error("runtime api error (status {status}): {message}")]
    Api {
        /// HTTP-like status code.
        status: u16,
        /// Message reported by the control plane.
        message: String,
    },
    /// The control plane could not be reached or answered with garbage.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// True when the error reports an absent object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }

    /// True when the error reports that a container is already detached.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, RuntimeError::NotConnected { .. })
    }
}
