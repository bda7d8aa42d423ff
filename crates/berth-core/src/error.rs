//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::fmt;

use berth_runtime::{ResourceKind, RuntimeError};
use serde::Serialize;
use thiserror::Error;

use crate::migration::MigrationError;
use crate::spec::SpecError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Reconciler operation an error or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Migrate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Migrate => "migrate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of container creation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateStage {
    Pull,
    Create,
    Start,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CreateStage::Pull => "pull",
            CreateStage::Create => "create",
            CreateStage::Start => "start",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{operation} of {kind} {id} failed")]
    Transport {
        operation: Operation,
        kind: ResourceKind,
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("{kind} {id} not found during {operation}")]
    NotFound {
        operation: Operation,
        kind: ResourceKind,
        id: String,
    },
    #[error("{kind} name already in use: {name}")]
    Conflict { kind: ResourceKind, name: String },
    #[error("creating container {name} failed at the {stage} stage (rolled back: {rolled_back})")]
    Create {
        name: String,
        stage: CreateStage,
        rolled_back: bool,
        #[source]
        source: RuntimeError,
    },
    #[error(transparent)]
    Migration(Box<MigrationError>),
    #[error("{kind} {id} must be replaced; changed fields: {}", .fields.join(", "))]
    ReplacementRequired {
        kind: ResourceKind,
        id: String,
        fields: Vec<&'static str>,
    },
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),
}

impl ReconcileError {
    /// Classify a runtime failure observed while operating on `id`.
    pub(crate) fn from_runtime(
        operation: Operation,
        kind: ResourceKind,
        id: &str,
        source: RuntimeError,
    ) -> Self {
        match source {
            RuntimeError::NotFound { .. } => ReconcileError::NotFound {
                operation,
                kind,
                id: id.to_owned(),
            },
            RuntimeError::Conflict { kind, name } => ReconcileError::Conflict { kind, name },
            source => ReconcileError::Transport {
                operation,
                kind,
                id: id.to_owned(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }
}

impl From<MigrationError> for ReconcileError {
    fn from(err: MigrationError) -> Self {
        ReconcileError::Migration(Box::new(err))
    }
}
