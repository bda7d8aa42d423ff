//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, RuntimeError};
use crate::types::{
    ContainerConfig, ContainerInspect, ContainerSummary, EndpointConfig, HostConfig, ListOptions,
    NetworkCreateOptions, NetworkInspect, RemoveOptions, StopOptions,
};

/// Handle shared by every reconciler for the lifetime of the process.
pub type SharedRuntime = Arc<dyn RuntimeClient>;

/// Control-plane operations consumed by the reconcilers.
///
/// Each call is a single request/response against the runtime. Implementations
/// must be safe for concurrent use; the reconcilers hold no lock around them.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Pull an image so that a later create call can reference it.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Create a container and return the identifier assigned by the runtime.
    async fn create_container(
        &self,
        config: &ContainerConfig,
        host_config: &HostConfig,
        name: &str,
    ) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Inspect a container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect>;

    /// Rename a container.
    async fn rename_container(&self, id: &str, new_name: &str) -> Result<()>;

    /// Stop a container, waiting up to the grace period.
    async fn stop_container(&self, id: &str, options: &StopOptions) -> Result<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, options: &RemoveOptions) -> Result<()>;

    /// List containers in runtime order.
    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>>;

    /// Create a network and return its identifier.
    async fn create_network(&self, name: &str, options: &NetworkCreateOptions) -> Result<String>;

    /// Inspect a network.
    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect>;

    /// Remove a network.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Rename a network in place. Most engines cannot, hence the default.
    async fn rename_network(&self, _id: &str, _new_name: &str) -> Result<()> {
        Err(RuntimeError::Unsupported("network rename"))
    }

    /// Attach a container to a network.
    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointConfig>,
    ) -> Result<()>;

    /// Detach a container from a network.
    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<()>;
}
