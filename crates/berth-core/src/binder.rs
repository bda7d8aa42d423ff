//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use berth_runtime::{EndpointConfig, RuntimeError, SharedRuntime};
use tracing::debug;

/// Attaches and detaches containers from networks.
#[derive(Clone)]
pub struct ContainerNetworkBinder {
    runtime: SharedRuntime,
}

impl ContainerNetworkBinder {
    pub fn new(runtime: SharedRuntime) -> Self {
        Self { runtime }
    }

    /// Attach a container, using default endpoint settings when `endpoint` is `None`.
    pub async fn connect(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointConfig>,
    ) -> Result<(), RuntimeError> {
        self.runtime
            .connect_network(network_id, container_id, endpoint)
            .await
    }

    /// Detach a container. A container that is already detached counts as success.
    pub async fn disconnect(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), RuntimeError> {
        match self
            .runtime
            .disconnect_network(network_id, container_id, force)
            .await
        {
            Err(err) if err.is_not_connected() => {
                debug!(network_id, container_id, "container already detached");
                Ok(())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for ContainerNetworkBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerNetworkBinder").finish_non_exhaustive()
    }
}
