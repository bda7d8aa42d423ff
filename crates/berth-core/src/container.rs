//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use berth_common::ReconcileConfig;
use berth_logging::{OperationContext, OperationOutcome};
use berth_runtime::{
    AttachedNetwork, ContainerConfig, ContainerInspect, HostConfig, PortBinding, PortMap,
    RemoveOptions, ResourceKind, RuntimeError, SharedRuntime, StopOptions,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CreateStage, Operation, ReconcileError, Result};
use crate::metrics::{observe, ReconcileMetrics};
use crate::spec::{ContainerSpec, PortMapping};

const KIND: &str = "container";
const PUBLISH_ADDRESS: &str = "0.0.0.0";

/// Observed state of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Published ports decoded from the live binding table, sorted.
    pub ports: Vec<PortMapping>,
    pub networks: Vec<AttachedNetwork>,
}

impl From<ContainerInspect> for ContainerState {
    fn from(inspect: ContainerInspect) -> Self {
        let mut ports = Vec::new();
        for (key, bindings) in &inspect.port_bindings {
            let Some(internal) = key.split('/').next().and_then(|p| p.parse().ok()) else {
                debug!(port = %key, "skipping unparsable container port");
                continue;
            };
            for binding in bindings {
                match binding.host_port.parse() {
                    Ok(external) => ports.push(PortMapping { internal, external }),
                    Err(_) => debug!(
                        port = %key,
                        host_port = %binding.host_port,
                        "skipping unparsable host port"
                    ),
                }
            }
        }
        ports.sort();
        Self {
            id: inspect.id,
            name: inspect.name.trim_start_matches('/').to_owned(),
            image: inspect.image,
            ports,
            networks: inspect.networks,
        }
    }
}

/// Difference between an observed container and its declared spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ContainerChange {
    None,
    Rename { from: String, to: String },
    Replace { fields: Vec<&'static str> },
}

/// Outcome of [`ContainerReconciler::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContainerUpdate {
    Unchanged,
    Renamed { from: String, to: String },
    /// Nothing was mutated; the caller must delete and recreate.
    ReplacementRequired { fields: Vec<&'static str> },
}

impl ContainerUpdate {
    /// Turn a required replacement into an error for callers that cannot replace.
    pub fn into_result(self, id: &str) -> Result<Self> {
        match self {
            ContainerUpdate::ReplacementRequired { fields } => {
                Err(ReconcileError::ReplacementRequired {
                    kind: ResourceKind::Container,
                    id: id.to_owned(),
                    fields,
                })
            }
            other => Ok(other),
        }
    }
}

/// Port-binding table for the declared ports: `"{internal}/tcp" -> [0.0.0.0:{external}]`.
pub fn port_bindings(ports: &[PortMapping]) -> PortMap {
    ports
        .iter()
        .map(|port| {
            (
                format!("{}/tcp", port.internal),
                vec![PortBinding {
                    host_ip: PUBLISH_ADDRESS.to_owned(),
                    host_port: port.external.to_string(),
                }],
            )
        })
        .collect()
}

/// Container and host configuration sent to the create call.
pub fn container_config(spec: &ContainerSpec) -> (ContainerConfig, HostConfig) {
    let port_bindings = port_bindings(&spec.ports);
    let config = ContainerConfig {
        image: spec.image.clone(),
        exposed_ports: port_bindings.keys().cloned().collect(),
        ..ContainerConfig::default()
    };
    (config, HostConfig { port_bindings })
}

/// Apply the mutation policy: a name change renames in place, an image or port
/// change forces replacement.
pub fn plan(current: &ContainerState, desired: &ContainerSpec) -> ContainerChange {
    let mut fields = Vec::new();
    if current.image != desired.image {
        fields.push("image");
    }
    let desired_ports: BTreeSet<&PortMapping> = desired.ports.iter().collect();
    let current_ports: BTreeSet<&PortMapping> = current.ports.iter().collect();
    if desired_ports != current_ports {
        fields.push("ports");
    }
    if !fields.is_empty() {
        return ContainerChange::Replace { fields };
    }
    if current.name != desired.name {
        return ContainerChange::Rename {
            from: current.name.clone(),
            to: desired.name.clone(),
        };
    }
    ContainerChange::None
}

/// Reconciles containers against the runtime.
#[derive(Clone)]
pub struct ContainerReconciler {
    runtime: SharedRuntime,
    settings: ReconcileConfig,
    metrics: Option<ReconcileMetrics>,
}

impl ContainerReconciler {
    pub fn new(runtime: SharedRuntime, settings: &ReconcileConfig) -> Self {
        Self {
            runtime,
            settings: settings.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pull the image, create the container and start it. Returns the runtime id.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        spec.validate()?;
        let context = OperationContext::new(KIND, Operation::Create.as_str()).with_name(&spec.name);
        match self.create_and_start(spec).await {
            Ok(id) => {
                observe(
                    self.metrics.as_ref(),
                    &context.clone().with_id(&id),
                    "container created",
                    OperationOutcome::Success,
                );
                Ok(id)
            }
            Err(err) => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    &err.to_string(),
                    OperationOutcome::Fault,
                );
                Err(err)
            }
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let failed = |stage: CreateStage, rolled_back: bool, source: RuntimeError| {
            ReconcileError::Create {
                name: spec.name.clone(),
                stage,
                rolled_back,
                source,
            }
        };

        self.runtime
            .pull_image(&spec.image)
            .await
            .map_err(|source| failed(CreateStage::Pull, false, source))?;

        let (config, host_config) = container_config(spec);
        let id = match self
            .runtime
            .create_container(&config, &host_config, &spec.name)
            .await
        {
            Ok(id) => id,
            Err(RuntimeError::Conflict { kind, name }) => {
                return Err(ReconcileError::Conflict { kind, name })
            }
            Err(source) => return Err(failed(CreateStage::Create, false, source)),
        };

        if let Err(source) = self.runtime.start_container(&id).await {
            let rolled_back = self.settings.rollback_failed_start && self.discard(&id).await;
            return Err(failed(CreateStage::Start, rolled_back, source));
        }
        Ok(id)
    }

    /// Force-remove a container that never started. Returns whether it is gone.
    async fn discard(&self, id: &str) -> bool {
        let options = RemoveOptions {
            remove_volumes: true,
            force: true,
        };
        match self.runtime.remove_container(id, &options).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => true,
            Err(err) => {
                warn!(container_id = id, error = %err, "failed to discard container after start failure");
                false
            }
        }
    }

    pub async fn read(&self, id: &str) -> Result<ContainerState> {
        self.inspect(Operation::Read, id).await
    }

    async fn inspect(&self, operation: Operation, id: &str) -> Result<ContainerState> {
        self.runtime
            .inspect_container(id)
            .await
            .map(ContainerState::from)
            .map_err(|err| ReconcileError::from_runtime(operation, ResourceKind::Container, id, err))
    }

    /// Converge a live container towards `desired` without ever replacing it.
    pub async fn update(&self, id: &str, desired: &ContainerSpec) -> Result<ContainerUpdate> {
        desired.validate()?;
        let context = OperationContext::new(KIND, Operation::Update.as_str())
            .with_id(id)
            .with_name(&desired.name);
        let current = self.inspect(Operation::Update, id).await?;

        let outcome = match plan(&current, desired) {
            ContainerChange::None => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "container already matches spec",
                    OperationOutcome::AlreadyConverged,
                );
                ContainerUpdate::Unchanged
            }
            ContainerChange::Rename { from, to } => {
                if let Err(err) = self.runtime.rename_container(id, &to).await {
                    let err =
                        ReconcileError::from_runtime(Operation::Update, ResourceKind::Container, id, err);
                    observe(self.metrics.as_ref(), &context, &err.to_string(), OperationOutcome::Fault);
                    return Err(err);
                }
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "container renamed",
                    OperationOutcome::Success,
                );
                ContainerUpdate::Renamed { from, to }
            }
            ContainerChange::Replace { fields } => {
                debug!(container_id = id, ?fields, "container requires replacement");
                ContainerUpdate::ReplacementRequired { fields }
            }
        };
        Ok(outcome)
    }

    /// Stop then force-remove, including anonymous volumes. An absent container is success.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let context = OperationContext::new(KIND, Operation::Delete.as_str()).with_id(id);
        let stop = StopOptions {
            timeout: Some(self.settings.stop_grace_period),
        };
        match self.runtime.stop_container(id, &stop).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "container already absent",
                    OperationOutcome::AlreadyConverged,
                );
                return Ok(());
            }
            Err(err) => return Err(self.delete_failed(&context, id, err)),
        }

        let remove = RemoveOptions {
            remove_volumes: true,
            force: true,
        };
        match self.runtime.remove_container(id, &remove).await {
            Ok(()) => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "container removed",
                    OperationOutcome::Success,
                );
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "container vanished before removal",
                    OperationOutcome::AlreadyConverged,
                );
                Ok(())
            }
            Err(err) => Err(self.delete_failed(&context, id, err)),
        }
    }

    fn delete_failed(
        &self,
        context: &OperationContext<'_>,
        id: &str,
        err: RuntimeError,
    ) -> ReconcileError {
        let err = ReconcileError::from_runtime(Operation::Delete, ResourceKind::Container, id, err);
        observe(self.metrics.as_ref(), context, &err.to_string(), OperationOutcome::Fault);
        err
    }
}

impl std::fmt::Debug for ContainerReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
