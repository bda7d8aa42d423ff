//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use berth_common::ReconcileConfig;
use berth_logging::{OperationContext, OperationOutcome};
use berth_runtime::{NetworkCreateOptions, NetworkInspect, ResourceKind, RuntimeError, SharedRuntime};
use serde::Serialize;

use crate::error::{Operation, ReconcileError, Result};
use crate::membership::containers_on_network;
use crate::metrics::{observe, ReconcileMetrics};
use crate::migration::{MigrationReport, NetworkMigrator};
use crate::spec::NetworkSpec;

const KIND: &str = "network";

/// Observed state of a network. Membership is never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub id: String,
    pub name: String,
    pub driver: String,
}

impl From<NetworkInspect> for NetworkState {
    fn from(inspect: NetworkInspect) -> Self {
        Self {
            id: inspect.id,
            name: inspect.name,
            driver: inspect.driver,
        }
    }
}

/// Outcome of [`NetworkReconciler::update`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NetworkUpdate {
    Unchanged,
    Renamed { from: String, to: String },
    /// The logical network now points at `report.new_network_id`.
    Migrated(MigrationReport),
    ReplacementRequired { fields: Vec<&'static str> },
}

impl NetworkUpdate {
    /// Id the logical network points at after this update.
    pub fn effective_id<'a>(&'a self, id: &'a str) -> &'a str {
        match self {
            NetworkUpdate::Migrated(report) => &report.new_network_id,
            _ => id,
        }
    }

    /// Turn a required replacement into an error for callers that cannot replace.
    pub fn into_result(self, id: &str) -> Result<Self> {
        match self {
            NetworkUpdate::ReplacementRequired { fields } => Err(ReconcileError::ReplacementRequired {
                kind: ResourceKind::Network,
                id: id.to_owned(),
                fields,
            }),
            other => Ok(other),
        }
    }
}

/// Reconciles networks against the runtime.
#[derive(Clone)]
pub struct NetworkReconciler {
    runtime: SharedRuntime,
    migrator: NetworkMigrator,
    metrics: Option<ReconcileMetrics>,
}

impl NetworkReconciler {
    pub fn new(runtime: SharedRuntime, settings: &ReconcileConfig) -> Self {
        Self {
            migrator: NetworkMigrator::new(runtime.clone(), settings.migration_suffix_len),
            runtime,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.migrator = self.migrator.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub async fn create(&self, spec: &NetworkSpec) -> Result<String> {
        spec.validate()?;
        let context = OperationContext::new(KIND, Operation::Create.as_str()).with_name(&spec.name);
        let options = NetworkCreateOptions {
            driver: spec.driver.clone(),
            ..NetworkCreateOptions::default()
        };
        match self.runtime.create_network(&spec.name, &options).await {
            Ok(id) => {
                observe(
                    self.metrics.as_ref(),
                    &context.clone().with_id(&id),
                    "network created",
                    OperationOutcome::Success,
                );
                Ok(id)
            }
            Err(err) => {
                let err = ReconcileError::from_runtime(
                    Operation::Create,
                    ResourceKind::Network,
                    &spec.name,
                    err,
                );
                observe(self.metrics.as_ref(), &context, &err.to_string(), OperationOutcome::Fault);
                Err(err)
            }
        }
    }

    pub async fn read(&self, id: &str) -> Result<NetworkState> {
        self.inspect(Operation::Read, id).await
    }

    /// Containers currently attached, recomputed from a full scan.
    pub async fn members(&self, id: &str) -> Result<Vec<String>> {
        let state = self.inspect(Operation::Read, id).await?;
        containers_on_network(self.runtime.as_ref(), &state)
            .await
            .map_err(|err| ReconcileError::from_runtime(Operation::Read, ResourceKind::Network, id, err))
    }

    async fn inspect(&self, operation: Operation, id: &str) -> Result<NetworkState> {
        self.runtime
            .inspect_network(id)
            .await
            .map(NetworkState::from)
            .map_err(|err| ReconcileError::from_runtime(operation, ResourceKind::Network, id, err))
    }

    /// Converge a live network towards `desired`.
    ///
    /// A driver change migrates every attached container to a replacement network.
    /// A name-only change renames in place when the runtime can.
    pub async fn update(&self, id: &str, desired: &NetworkSpec) -> Result<NetworkUpdate> {
        desired.validate()?;
        let context = OperationContext::new(KIND, Operation::Update.as_str())
            .with_id(id)
            .with_name(&desired.name);
        let current = self.inspect(Operation::Update, id).await?;

        if current.driver != desired.driver {
            return match self.migrator.migrate(&current, desired).await {
                Ok(report) => {
                    observe(
                        self.metrics.as_ref(),
                        &context,
                        "network migrated to replacement",
                        OperationOutcome::Success,
                    );
                    Ok(NetworkUpdate::Migrated(report))
                }
                Err(err) => {
                    observe(self.metrics.as_ref(), &context, &err.to_string(), OperationOutcome::Fault);
                    Err(err.into())
                }
            };
        }

        if current.name == desired.name {
            observe(
                self.metrics.as_ref(),
                &context,
                "network already matches spec",
                OperationOutcome::AlreadyConverged,
            );
            return Ok(NetworkUpdate::Unchanged);
        }

        match self.runtime.rename_network(id, &desired.name).await {
            Ok(()) => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "network renamed",
                    OperationOutcome::Success,
                );
                Ok(NetworkUpdate::Renamed {
                    from: current.name,
                    to: desired.name.clone(),
                })
            }
            Err(RuntimeError::Unsupported(_)) => Ok(NetworkUpdate::ReplacementRequired {
                fields: vec!["name"],
            }),
            Err(err) => {
                let err = ReconcileError::from_runtime(Operation::Update, ResourceKind::Network, id, err);
                observe(self.metrics.as_ref(), &context, &err.to_string(), OperationOutcome::Fault);
                Err(err)
            }
        }
    }

    /// Remove the network. An absent network is success.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let context = OperationContext::new(KIND, Operation::Delete.as_str()).with_id(id);
        match self.runtime.remove_network(id).await {
            Ok(()) => {
                observe(self.metrics.as_ref(), &context, "network removed", OperationOutcome::Success);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                observe(
                    self.metrics.as_ref(),
                    &context,
                    "network already absent",
                    OperationOutcome::AlreadyConverged,
                );
                Ok(())
            }
            Err(err) => {
                let err = ReconcileError::from_runtime(Operation::Delete, ResourceKind::Network, id, err);
                observe(self.metrics.as_ref(), &context, &err.to_string(), OperationOutcome::Fault);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for NetworkReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkReconciler")
            .field("migrator", &self.migrator)
            .finish_non_exhaustive()
    }
}
