//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! Network replacement saga.
//!
//! A network whose driver changes cannot be mutated in place. [`NetworkMigrator`]
//! creates a replacement network under a fresh name, then moves each attached
//! container across one at a time:
//!
//! ```text
//! Planning -> NewNetworkCreated -> ContainersMigrating -> Committed
//!                                          |
//!                                          +-> Failed
//! ```
//!
//! There is no cross-step transaction. The step log in [`MigrationPlan`] records
//! what actually happened to each container and is what a caller should trust when
//! a run stops part way. The old network is never removed.

use std::fmt;

use berth_common::MIGRATION_SUFFIX_RANGE;
use berth_runtime::{NetworkCreateOptions, RuntimeError, SharedRuntime};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::binder::ContainerNetworkBinder;
use crate::membership::containers_on_network;
use crate::metrics::ReconcileMetrics;
use crate::network::NetworkState;
use crate::spec::NetworkSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPhase {
    Planning,
    NewNetworkCreated,
    ContainersMigrating,
    Committed,
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationPhase::Planning => "planning",
            MigrationPhase::NewNetworkCreated => "new-network-created",
            MigrationPhase::ContainersMigrating => "containers-migrating",
            MigrationPhase::Committed => "committed",
            MigrationPhase::Failed => "failed",
        })
    }
}

/// What happened to a container whose move was interrupted after disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compensation {
    /// The container was never detached from the old network.
    NotNeeded,
    /// The container was reattached to the old network.
    RolledBack,
    /// Reattaching failed too; the container is on neither network.
    Stranded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StepOutcome {
    Moved,
    DisconnectFailed {
        error: String,
    },
    ConnectFailed {
        error: String,
        compensation: Compensation,
    },
}

/// One entry of the step log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    pub container_id: String,
    pub outcome: StepOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Working state of a single migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub old_network_id: String,
    pub new_network_id: Option<String>,
    pub new_network_name: String,
    /// Containers found on the old network, in list order.
    pub containers: Vec<String>,
    cursor: usize,
    pub steps: Vec<MigrationStep>,
    pub phase: MigrationPhase,
    pub started_at: DateTime<Utc>,
}

impl MigrationPlan {
    pub fn new(old_network_id: impl Into<String>, new_network_name: impl Into<String>) -> Self {
        Self {
            old_network_id: old_network_id.into(),
            new_network_id: None,
            new_network_name: new_network_name.into(),
            containers: Vec::new(),
            cursor: 0,
            steps: Vec::new(),
            phase: MigrationPhase::Planning,
            started_at: Utc::now(),
        }
    }

    /// Containers whose move completed, according to the step log.
    pub fn moved(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| step.outcome == StepOutcome::Moved)
            .map(|step| step.container_id.clone())
            .collect()
    }

    /// Containers not yet moved, starting with the one that failed if any.
    pub fn remaining(&self) -> &[String] {
        &self.containers[self.cursor.min(self.containers.len())..]
    }

    fn advance(&mut self, phase: MigrationPhase) {
        info!(
            old_network_id = %self.old_network_id,
            new_network_name = %self.new_network_name,
            from = %self.phase,
            to = %phase,
            "migration phase transition"
        );
        self.phase = phase;
    }

    fn next_container(&self) -> Option<String> {
        self.containers.get(self.cursor).cloned()
    }

    fn record(&mut self, container_id: String, outcome: StepOutcome) {
        if outcome == StepOutcome::Moved {
            self.cursor += 1;
        }
        self.steps.push(MigrationStep {
            container_id,
            outcome,
            finished_at: Utc::now(),
        });
    }
}

/// Successful migration summary.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub old_network_id: String,
    /// The id the logical network now points at.
    pub new_network_id: String,
    pub new_network_name: String,
    pub moved: Vec<String>,
    pub steps: Vec<MigrationStep>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A migration that stopped before committing.
///
/// `phase` is the phase that was in progress when the failure happened.
#[derive(Debug, Clone, Error, Serialize)]
#[error("migration of network {old_network_id} failed during {phase}{}", on_container(.failed))]
pub struct MigrationError {
    pub phase: MigrationPhase,
    pub old_network_id: String,
    /// Set once the replacement network exists.
    pub new_network_id: Option<String>,
    pub moved: Vec<String>,
    pub failed: Option<String>,
    /// Containers never attempted.
    pub pending: Vec<String>,
    pub compensation: Compensation,
    pub steps: Vec<MigrationStep>,
    #[source]
    #[serde(serialize_with = "serialize_display")]
    pub source: RuntimeError,
}

fn on_container(failed: &Option<String>) -> String {
    failed
        .as_deref()
        .map(|id| format!(" on container {id}"))
        .unwrap_or_default()
}

fn serialize_display<S: serde::Serializer>(
    value: &RuntimeError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

struct StepFailure {
    outcome: StepOutcome,
    compensation: Compensation,
    source: RuntimeError,
}

/// Drives a network replacement.
#[derive(Clone)]
pub struct NetworkMigrator {
    runtime: SharedRuntime,
    binder: ContainerNetworkBinder,
    suffix_len: usize,
    metrics: Option<ReconcileMetrics>,
}

impl NetworkMigrator {
    /// `suffix_len` is clamped to [`MIGRATION_SUFFIX_RANGE`].
    pub fn new(runtime: SharedRuntime, suffix_len: usize) -> Self {
        Self {
            binder: ContainerNetworkBinder::new(runtime.clone()),
            runtime,
            suffix_len: suffix_len.clamp(
                *MIGRATION_SUFFIX_RANGE.start(),
                *MIGRATION_SUFFIX_RANGE.end(),
            ),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `{base}-{suffix}` where the suffix is drawn from a fresh UUIDv4.
    pub fn replacement_name(&self, base: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{base}-{}", &suffix[..self.suffix_len])
    }

    /// Replace `current` with a network built from `desired` and move every
    /// attached container onto it.
    pub async fn migrate(
        &self,
        current: &NetworkState,
        desired: &NetworkSpec,
    ) -> Result<MigrationReport, MigrationError> {
        let mut plan = MigrationPlan::new(&current.id, self.replacement_name(&desired.name));
        info!(
            old_network_id = %current.id,
            new_network_name = %plan.new_network_name,
            driver = %desired.driver,
            "starting network migration"
        );

        let options = NetworkCreateOptions {
            driver: desired.driver.clone(),
            ..NetworkCreateOptions::default()
        };
        let new_name = plan.new_network_name.clone();
        let new_id = match self.runtime.create_network(&new_name, &options).await {
            Ok(id) => id,
            Err(source) => return Err(self.abort(plan, None, Compensation::NotNeeded, source)),
        };
        plan.new_network_id = Some(new_id.clone());
        plan.advance(MigrationPhase::NewNetworkCreated);

        plan.containers = match containers_on_network(self.runtime.as_ref(), current).await {
            Ok(members) => members,
            Err(source) => return Err(self.abort(plan, None, Compensation::NotNeeded, source)),
        };
        plan.advance(MigrationPhase::ContainersMigrating);

        while let Some(container_id) = plan.next_container() {
            match self.move_container(&current.id, &new_id, &container_id).await {
                Ok(()) => {
                    self.count_move("moved");
                    plan.record(container_id, StepOutcome::Moved);
                }
                Err(failure) => {
                    self.count_move("failed");
                    plan.record(container_id.clone(), failure.outcome);
                    return Err(self.abort(
                        plan,
                        Some(container_id),
                        failure.compensation,
                        failure.source,
                    ));
                }
            }
        }

        plan.advance(MigrationPhase::Committed);
        if let Some(metrics) = &self.metrics {
            metrics.record_migration("committed");
        }
        Ok(MigrationReport {
            moved: plan.moved(),
            old_network_id: plan.old_network_id,
            new_network_id: new_id,
            new_network_name: plan.new_network_name,
            steps: plan.steps,
            started_at: plan.started_at,
            finished_at: Utc::now(),
        })
    }

    /// Disconnect from `old`, connect to `new`, reattach to `old` if connect fails.
    async fn move_container(
        &self,
        old: &str,
        new: &str,
        container_id: &str,
    ) -> Result<(), StepFailure> {
        if let Err(source) = self.binder.disconnect(old, container_id, true).await {
            return Err(StepFailure {
                outcome: StepOutcome::DisconnectFailed {
                    error: source.to_string(),
                },
                compensation: Compensation::NotNeeded,
                source,
            });
        }

        let Err(source) = self.binder.connect(new, container_id, None).await else {
            return Ok(());
        };
        let compensation = match self.binder.connect(old, container_id, None).await {
            Ok(()) => Compensation::RolledBack,
            Err(err) => {
                warn!(
                    container_id,
                    old_network_id = old,
                    error = %err,
                    "container could not be reattached to its original network"
                );
                Compensation::Stranded
            }
        };
        Err(StepFailure {
            outcome: StepOutcome::ConnectFailed {
                error: source.to_string(),
                compensation,
            },
            compensation,
            source,
        })
    }

    fn count_move(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_container_move(outcome);
        }
    }

    fn abort(
        &self,
        mut plan: MigrationPlan,
        failed: Option<String>,
        compensation: Compensation,
        source: RuntimeError,
    ) -> MigrationError {
        let phase = plan.phase;
        if phase == MigrationPhase::ContainersMigrating {
            plan.advance(MigrationPhase::Failed);
        }
        let skip = usize::from(failed.is_some());
        let pending = plan.remaining().iter().skip(skip).cloned().collect();
        warn!(
            old_network_id = %plan.old_network_id,
            new_network_id = plan.new_network_id.as_deref().unwrap_or(""),
            %phase,
            failed = failed.as_deref().unwrap_or(""),
            error = %source,
            "network migration failed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_migration("failed");
        }
        MigrationError {
            phase,
            moved: plan.moved(),
            old_network_id: plan.old_network_id,
            new_network_id: plan.new_network_id,
            failed,
            pending,
            compensation,
            steps: plan.steps,
            source,
        }
    }
}

impl std::fmt::Debug for NetworkMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMigrator")
            .field("suffix_len", &self.suffix_len)
            .finish_non_exhaustive()
    }
}
