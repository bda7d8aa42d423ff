//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! Reconciliation core.
//!
//! [`ContainerReconciler`] and [`NetworkReconciler`] translate declarative specs into
//! [`berth_runtime::RuntimeClient`] calls. A driver change on a network is carried out by
//! [`NetworkMigrator`], which moves every attached container onto a replacement network
//! through [`ContainerNetworkBinder`] and records each move in a step log.

pub mod binder;
pub mod container;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod migration;
pub mod network;
pub mod spec;

pub use binder::ContainerNetworkBinder;
pub use container::{
    container_config, plan, port_bindings, ContainerChange, ContainerReconciler, ContainerState,
    ContainerUpdate,
};
pub use error::{CreateStage, Operation, ReconcileError, Result};
pub use membership::containers_on_network;
pub use metrics::{new_registry, ReconcileMetrics, SharedRegistry};
pub use migration::{
    Compensation, MigrationError, MigrationPhase, MigrationPlan, MigrationReport, MigrationStep,
    NetworkMigrator, StepOutcome,
};
pub use network::{NetworkReconciler, NetworkState, NetworkUpdate};
pub use spec::{ContainerSpec, NetworkSpec, PortMapping, SpecError, DEFAULT_NETWORK_DRIVER};
