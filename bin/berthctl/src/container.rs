//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "binary"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Operator CLI reconciling containers and networks."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use anyhow::Result;
use berth_core::{ContainerReconciler, ContainerSpec, ContainerUpdate, PortMapping};
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use crate::{emit, Session};

/// Container lifecycle commands.
#[derive(Debug, Subcommand)]
pub enum ContainerCommand {
    /// Pull the image, create and start the container, print its id.
    Create(ContainerArgs),
    /// Print the observed state of a container.
    Read { id: String },
    /// Converge a container towards the given spec.
    Update {
        id: String,
        #[command(flatten)]
        spec: ContainerArgs,
        /// Delete and recreate when the image or ports changed.
        #[arg(long)]
        replace: bool,
    },
    /// Stop and remove a container. Succeeds when it is already gone.
    Delete { id: String },
}

#[derive(Debug, Args)]
pub struct ContainerArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub image: String,
    /// Published port, repeatable.
    #[arg(long = "port", value_name = "INTERNAL:EXTERNAL", required = true)]
    pub ports: Vec<PortMapping>,
}

impl ContainerArgs {
    pub fn into_spec(self) -> ContainerSpec {
        ContainerSpec::new(self.name, self.image, self.ports)
    }
}

pub async fn run(session: &Session, command: ContainerCommand) -> Result<()> {
    let reconciler = ContainerReconciler::new(session.runtime.clone(), &session.config.reconcile)
        .with_metrics(session.metrics.clone());
    match command {
        ContainerCommand::Create(args) => {
            let id = reconciler.create(&args.into_spec()).await?;
            emit(&json!({ "id": id }))
        }
        ContainerCommand::Read { id } => emit(&reconciler.read(&id).await?),
        ContainerCommand::Update { id, spec, replace } => {
            let spec = spec.into_spec();
            match reconciler.update(&id, &spec).await? {
                ContainerUpdate::ReplacementRequired { fields } if replace => {
                    info!(container_id = %id, ?fields, "replacing container");
                    reconciler.delete(&id).await?;
                    let new_id = reconciler.create(&spec).await?;
                    emit(&json!({
                        "outcome": "replaced",
                        "previous_id": id,
                        "id": new_id,
                        "fields": fields,
                    }))
                }
                outcome => emit(&outcome.into_result(&id)?),
            }
        }
        ContainerCommand::Delete { id } => {
            reconciler.delete(&id).await?;
            emit(&json!({ "id": id, "deleted": true }))
        }
    }
}
