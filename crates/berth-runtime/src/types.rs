//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port-binding table keyed by `"{port}/{proto}"`.
pub type PortMap = BTreeMap<String, Vec<PortBinding>>;

/// A single host binding for a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host interface address.
    pub host_ip: String,
    /// Host port, as the engine transports it.
    pub host_port: String,
}

/// Container-level configuration passed to the create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image reference.
    pub image: String,
    /// Ports exposed by the container, e.g. `80/tcp`.
    #[serde(default)]
    pub exposed_ports: BTreeSet<String>,
    /// Labels applied to the container.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Host-level configuration passed to the create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Published port bindings.
    #[serde(default)]
    pub port_bindings: PortMap,
}

/// A network a container is attached to, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedNetwork {
    /// Network name (the key the engine uses in container network maps).
    pub name: String,
    /// Network identifier.
    pub network_id: String,
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspect {
    /// Container identifier.
    pub id: String,
    /// Container name, possibly prefixed with `/` by the engine.
    pub name: String,
    /// Image reference from the container configuration.
    pub image: String,
    /// Published port bindings.
    #[serde(default)]
    pub port_bindings: PortMap,
    /// Attached networks.
    #[serde(default)]
    pub networks: Vec<AttachedNetwork>,
}

/// Entry returned by the container list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container identifier.
    pub id: String,
    /// Names assigned to the container.
    #[serde(default)]
    pub names: Vec<String>,
    /// Attached networks.
    #[serde(default)]
    pub networks: Vec<AttachedNetwork>,
}

impl ContainerSummary {
    /// True when the container is attached to the network identified by id or name.
    pub fn is_attached_to(&self, network_id: &str, network_name: Option<&str>) -> bool {
        self.networks.iter().any(|attached| {
            attached.network_id == network_id
                || network_name.is_some_and(|name| attached.name == name)
        })
    }
}

/// Result of inspecting a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInspect {
    /// Network identifier.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Network driver.
    pub driver: String,
}

/// Options for the network create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCreateOptions {
    /// Network driver, e.g. `bridge` or `overlay`.
    pub driver: String,
    /// Labels applied to the network.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Endpoint settings used when connecting a container to a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// DNS aliases for the container on this network.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Options for the container stop call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Grace period before the runtime kills the container.
    pub timeout: Option<Duration>,
}

/// Options for the container remove call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove anonymous volumes attached to the container.
    pub remove_volumes: bool,
    /// Kill the container first if it is running.
    pub force: bool,
}

/// Options for the container list call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include stopped containers.
    pub all: bool,
}
