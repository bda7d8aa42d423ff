//! ---
//! berth_section: "11-testing"
//! berth_subsection: "01-bootstrap"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "In-memory runtime used by reconciler and migration test suites."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! [`MemoryRuntime`] implements [`RuntimeClient`] entirely in memory. Every call is
//! journaled so tests can assert on the exact sequence issued by a reconciler, and
//! faults can be injected per operation and target to drive partial-failure paths.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use berth_runtime::{
    AttachedNetwork, ContainerConfig, ContainerInspect, ContainerSummary, EndpointConfig,
    HostConfig, ListOptions, NetworkCreateOptions, NetworkInspect, RemoveOptions, ResourceKind,
    Result, RuntimeClient, RuntimeError, StopOptions,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

/// Operation selector used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PullImage,
    CreateContainer,
    StartContainer,
    InspectContainer,
    RenameContainer,
    StopContainer,
    RemoveContainer,
    ListContainers,
    CreateNetwork,
    InspectNetwork,
    RemoveNetwork,
    RenameNetwork,
    ConnectNetwork,
    DisconnectNetwork,
}

/// Journal entry describing one call received by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    PullImage {
        reference: String,
    },
    CreateContainer {
        name: String,
        config: ContainerConfig,
        host_config: HostConfig,
    },
    StartContainer {
        id: String,
    },
    InspectContainer {
        id: String,
    },
    RenameContainer {
        id: String,
        new_name: String,
    },
    StopContainer {
        id: String,
        timeout: Option<Duration>,
    },
    RemoveContainer {
        id: String,
        remove_volumes: bool,
        force: bool,
    },
    ListContainers {
        all: bool,
    },
    CreateNetwork {
        name: String,
        driver: String,
    },
    InspectNetwork {
        id: String,
    },
    RemoveNetwork {
        id: String,
    },
    RenameNetwork {
        id: String,
        new_name: String,
    },
    ConnectNetwork {
        network_id: String,
        container_id: String,
    },
    DisconnectNetwork {
        network_id: String,
        container_id: String,
        force: bool,
    },
}

impl RuntimeCall {
    /// Operation selector for this call.
    pub fn operation(&self) -> Operation {
        match self {
            RuntimeCall::PullImage { .. } => Operation::PullImage,
            RuntimeCall::CreateContainer { .. } => Operation::CreateContainer,
            RuntimeCall::StartContainer { .. } => Operation::StartContainer,
            RuntimeCall::InspectContainer { .. } => Operation::InspectContainer,
            RuntimeCall::RenameContainer { .. } => Operation::RenameContainer,
            RuntimeCall::StopContainer { .. } => Operation::StopContainer,
            RuntimeCall::RemoveContainer { .. } => Operation::RemoveContainer,
            RuntimeCall::ListContainers { .. } => Operation::ListContainers,
            RuntimeCall::CreateNetwork { .. } => Operation::CreateNetwork,
            RuntimeCall::InspectNetwork { .. } => Operation::InspectNetwork,
            RuntimeCall::RemoveNetwork { .. } => Operation::RemoveNetwork,
            RuntimeCall::RenameNetwork { .. } => Operation::RenameNetwork,
            RuntimeCall::ConnectNetwork { .. } => Operation::ConnectNetwork,
            RuntimeCall::DisconnectNetwork { .. } => Operation::DisconnectNetwork,
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    operation: Operation,
    target: Option<String>,
    error: RuntimeError,
    /// `None` fails every matching call.
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct MemContainer {
    name: String,
    config: ContainerConfig,
    host_config: HostConfig,
    running: bool,
    networks: Vec<String>,
}

#[derive(Debug, Clone)]
struct MemNetwork {
    name: String,
    driver: String,
}

#[derive(Debug, Default)]
struct Inner {
    containers: IndexMap<String, MemContainer>,
    networks: IndexMap<String, MemNetwork>,
    images: BTreeSet<String>,
    faults: Vec<Fault>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    network_rename: bool,
}

impl Inner {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn record(&mut self, call: RuntimeCall) {
        self.calls.push(call);
    }

    fn check_fault(&mut self, operation: Operation, target: &str) -> Result<()> {
        let position = self.faults.iter().position(|fault| {
            fault.operation == operation
                && fault.target.as_deref().map_or(true, |t| t == target)
        });
        let Some(index) = position else {
            return Ok(());
        };
        let fault = &mut self.faults[index];
        let error = fault.error.clone();
        match fault.remaining.as_mut() {
            Some(remaining) if *remaining <= 1 => {
                self.faults.remove(index);
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        debug!(?operation, target, %error, "injected runtime fault");
        Err(error)
    }

    fn container(&self, id: &str) -> Result<&MemContainer> {
        self.containers.get(id).ok_or_else(|| RuntimeError::NotFound {
            kind: ResourceKind::Container,
            id: id.to_owned(),
        })
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MemContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: ResourceKind::Container,
                id: id.to_owned(),
            })
    }

    /// Resolve a network by id or by name, the way the engine does.
    fn resolve_network(&self, id_or_name: &str) -> Result<String> {
        if self.networks.contains_key(id_or_name) {
            return Ok(id_or_name.to_owned());
        }
        self.networks
            .iter()
            .find(|(_, network)| network.name == id_or_name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| RuntimeError::NotFound {
                kind: ResourceKind::Network,
                id: id_or_name.to_owned(),
            })
    }

    fn attached(&self, container: &MemContainer) -> Vec<AttachedNetwork> {
        container
            .networks
            .iter()
            .filter_map(|network_id| {
                self.networks.get(network_id).map(|network| AttachedNetwork {
                    name: network.name.clone(),
                    network_id: network_id.clone(),
                })
            })
            .collect()
    }
}

/// In-memory [`RuntimeClient`] with a call journal and fault injection.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable in-place network renames (the default mirrors engines that lack them).
    pub fn with_network_rename(self) -> Self {
        self.inner.lock().network_rename = true;
        self
    }

    /// Make an image available without recording a pull.
    pub fn seed_image(&self, reference: &str) {
        self.inner.lock().images.insert(reference.to_owned());
    }

    /// Create a running container directly, bypassing the journal.
    pub fn seed_container(&self, name: &str, image: &str) -> String {
        let mut inner = self.inner.lock();
        let id = inner.allocate_id("ctr");
        inner.images.insert(image.to_owned());
        inner.containers.insert(
            id.clone(),
            MemContainer {
                name: name.to_owned(),
                config: ContainerConfig {
                    image: image.to_owned(),
                    ..ContainerConfig::default()
                },
                host_config: HostConfig::default(),
                running: true,
                networks: Vec::new(),
            },
        );
        id
    }

    /// Create a network directly, bypassing the journal.
    pub fn seed_network(&self, name: &str, driver: &str) -> String {
        let mut inner = self.inner.lock();
        let id = inner.allocate_id("net");
        inner.networks.insert(
            id.clone(),
            MemNetwork {
                name: name.to_owned(),
                driver: driver.to_owned(),
            },
        );
        id
    }

    /// Attach a seeded container to a seeded network, bypassing the journal.
    pub fn attach(&self, container_id: &str, network_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(container) = inner.containers.get_mut(container_id) {
            if !container.networks.iter().any(|n| n == network_id) {
                container.networks.push(network_id.to_owned());
            }
        }
    }

    /// Remove a container behind the reconciler's back.
    pub fn evict_container(&self, id: &str) {
        self.inner.lock().containers.shift_remove(id);
    }

    /// Remove a network behind the reconciler's back.
    pub fn evict_network(&self, id: &str) {
        self.inner.lock().networks.shift_remove(id);
    }

    /// Fail the next matching call once.
    pub fn fail_once(&self, operation: Operation, target: Option<&str>, error: RuntimeError) {
        self.push_fault(operation, target, error, Some(1));
    }

    /// Fail every matching call until [`MemoryRuntime::clear_faults`] is called.
    pub fn fail_always(&self, operation: Operation, target: Option<&str>, error: RuntimeError) {
        self.push_fault(operation, target, error, None);
    }

    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    fn push_fault(
        &self,
        operation: Operation,
        target: Option<&str>,
        error: RuntimeError,
        remaining: Option<usize>,
    ) {
        self.inner.lock().faults.push(Fault {
            operation,
            target: target.map(str::to_owned),
            error,
            remaining,
        });
    }

    /// Snapshot of every journaled call, oldest first.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().calls.clone()
    }

    /// Journaled calls for a single operation.
    pub fn calls_for(&self, operation: Operation) -> Vec<RuntimeCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.inner.lock().containers.contains_key(id)
    }

    pub fn has_network(&self, id: &str) -> bool {
        self.inner.lock().networks.contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner
            .lock()
            .containers
            .get(id)
            .map(|container| container.running)
            .unwrap_or(false)
    }

    /// Network ids the container is attached to, in attachment order.
    pub fn networks_of(&self, container_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .containers
            .get(container_id)
            .map(|container| container.networks.clone())
            .unwrap_or_default()
    }

    /// Container ids attached to the network, in list order.
    pub fn members_of(&self, network_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .containers
            .iter()
            .filter(|(_, container)| container.networks.iter().any(|n| n == network_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Look up a network id by name.
    pub fn network_named(&self, name: &str) -> Option<String> {
        self.inner.lock().resolve_network(name).ok()
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    pub fn network_count(&self) -> usize {
        self.inner.lock().networks.len()
    }
}

#[async_trait]
impl RuntimeClient for MemoryRuntime {
    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::PullImage {
            reference: reference.to_owned(),
        });
        inner.check_fault(Operation::PullImage, reference)?;
        inner.images.insert(reference.to_owned());
        Ok(())
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
        host_config: &HostConfig,
        name: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::CreateContainer {
            name: name.to_owned(),
            config: config.clone(),
            host_config: host_config.clone(),
        });
        inner.check_fault(Operation::CreateContainer, name)?;
        if !inner.images.contains(&config.image) {
            return Err(RuntimeError::NotFound {
                kind: ResourceKind::Image,
                id: config.image.clone(),
            });
        }
        if inner.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Container,
                name: name.to_owned(),
            });
        }
        let id = inner.allocate_id("ctr");
        inner.containers.insert(
            id.clone(),
            MemContainer {
                name: name.to_owned(),
                config: config.clone(),
                host_config: host_config.clone(),
                running: false,
                networks: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::StartContainer { id: id.to_owned() });
        inner.check_fault(Operation::StartContainer, id)?;
        inner.container_mut(id)?.running = true;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::InspectContainer { id: id.to_owned() });
        inner.check_fault(Operation::InspectContainer, id)?;
        let container = inner.container(id)?;
        Ok(ContainerInspect {
            id: id.to_owned(),
            name: format!("/{}", container.name),
            image: container.config.image.clone(),
            port_bindings: container.host_config.port_bindings.clone(),
            networks: inner.attached(container),
        })
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::RenameContainer {
            id: id.to_owned(),
            new_name: new_name.to_owned(),
        });
        inner.check_fault(Operation::RenameContainer, id)?;
        inner.container(id)?;
        if inner
            .containers
            .iter()
            .any(|(other, c)| other != id && c.name == new_name)
        {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Container,
                name: new_name.to_owned(),
            });
        }
        inner.container_mut(id)?.name = new_name.to_owned();
        Ok(())
    }

    async fn stop_container(&self, id: &str, options: &StopOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::StopContainer {
            id: id.to_owned(),
            timeout: options.timeout,
        });
        inner.check_fault(Operation::StopContainer, id)?;
        inner.container_mut(id)?.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: &RemoveOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::RemoveContainer {
            id: id.to_owned(),
            remove_volumes: options.remove_volumes,
            force: options.force,
        });
        inner.check_fault(Operation::RemoveContainer, id)?;
        if inner.container(id)?.running && !options.force {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container {id} is running; stop it or use force"),
            });
        }
        inner.containers.shift_remove(id);
        Ok(())
    }

    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::ListContainers { all: options.all });
        inner.check_fault(Operation::ListContainers, "*")?;
        Ok(inner
            .containers
            .iter()
            .filter(|(_, container)| options.all || container.running)
            .map(|(id, container)| ContainerSummary {
                id: id.clone(),
                names: vec![format!("/{}", container.name)],
                networks: inner.attached(container),
            })
            .collect())
    }

    async fn create_network(&self, name: &str, options: &NetworkCreateOptions) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::CreateNetwork {
            name: name.to_owned(),
            driver: options.driver.clone(),
        });
        inner.check_fault(Operation::CreateNetwork, name)?;
        if inner.networks.values().any(|n| n.name == name) {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Network,
                name: name.to_owned(),
            });
        }
        let id = inner.allocate_id("net");
        inner.networks.insert(
            id.clone(),
            MemNetwork {
                name: name.to_owned(),
                driver: options.driver.clone(),
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::InspectNetwork { id: id.to_owned() });
        inner.check_fault(Operation::InspectNetwork, id)?;
        let resolved = inner.resolve_network(id)?;
        let network = &inner.networks[&resolved];
        Ok(NetworkInspect {
            id: resolved.clone(),
            name: network.name.clone(),
            driver: network.driver.clone(),
        })
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::RemoveNetwork { id: id.to_owned() });
        inner.check_fault(Operation::RemoveNetwork, id)?;
        let resolved = inner.resolve_network(id)?;
        if inner
            .containers
            .values()
            .any(|c| c.networks.iter().any(|n| n == &resolved))
        {
            return Err(RuntimeError::Api {
                status: 403,
                message: format!("network {id} has active endpoints"),
            });
        }
        inner.networks.shift_remove(&resolved);
        Ok(())
    }

    async fn rename_network(&self, id: &str, new_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::RenameNetwork {
            id: id.to_owned(),
            new_name: new_name.to_owned(),
        });
        inner.check_fault(Operation::RenameNetwork, id)?;
        if !inner.network_rename {
            return Err(RuntimeError::Unsupported("network rename"));
        }
        let resolved = inner.resolve_network(id)?;
        if inner
            .networks
            .iter()
            .any(|(other, n)| other != &resolved && n.name == new_name)
        {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Network,
                name: new_name.to_owned(),
            });
        }
        if let Some(network) = inner.networks.get_mut(&resolved) {
            network.name = new_name.to_owned();
        }
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        _endpoint: Option<&EndpointConfig>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::ConnectNetwork {
            network_id: network_id.to_owned(),
            container_id: container_id.to_owned(),
        });
        inner.check_fault(Operation::ConnectNetwork, container_id)?;
        let resolved = inner.resolve_network(network_id)?;
        let container = inner.container_mut(container_id)?;
        if container.networks.iter().any(|n| n == &resolved) {
            return Err(RuntimeError::Api {
                status: 403,
                message: format!("container {container_id} is already attached to {network_id}"),
            });
        }
        container.networks.push(resolved);
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record(RuntimeCall::DisconnectNetwork {
            network_id: network_id.to_owned(),
            container_id: container_id.to_owned(),
            force,
        });
        inner.check_fault(Operation::DisconnectNetwork, container_id)?;
        let resolved = inner.resolve_network(network_id)?;
        let container = inner.container_mut(container_id)?;
        let Some(position) = container.networks.iter().position(|n| n == &resolved) else {
            return Err(RuntimeError::NotConnected {
                network: network_id.to_owned(),
                container: container_id.to_owned(),
            });
        };
        container.networks.remove(position);
        Ok(())
    }
}
