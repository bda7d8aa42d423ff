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
use berth_core::{NetworkReconciler, NetworkSpec, DEFAULT_NETWORK_DRIVER};
use clap::{Args, Subcommand};
use serde_json::json;

use crate::{emit, Session};

/// Network lifecycle commands.
#[derive(Debug, Subcommand)]
pub enum NetworkCommand {
    /// Create a network and print its id.
    Create(NetworkArgs),
    /// Print a network and the containers currently attached to it.
    Read { id: String },
    /// Converge a network; a driver change migrates attached containers.
    Update {
        id: String,
        #[command(flatten)]
        spec: NetworkArgs,
    },
    /// Remove a network. Succeeds when it is already gone.
    Delete { id: String },
}

#[derive(Debug, Args)]
pub struct NetworkArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = DEFAULT_NETWORK_DRIVER)]
    pub driver: String,
}

impl NetworkArgs {
    pub fn into_spec(self) -> NetworkSpec {
        NetworkSpec::new(self.name).with_driver(self.driver)
    }
}

pub async fn run(session: &Session, command: NetworkCommand) -> Result<()> {
    let reconciler = NetworkReconciler::new(session.runtime.clone(), &session.config.reconcile)
        .with_metrics(session.metrics.clone());
    match command {
        NetworkCommand::Create(args) => {
            let id = reconciler.create(&args.into_spec()).await?;
            emit(&json!({ "id": id }))
        }
        NetworkCommand::Read { id } => {
            let state = reconciler.read(&id).await?;
            let members = reconciler.members(&id).await?;
            emit(&json!({ "network": state, "containers": members }))
        }
        NetworkCommand::Update { id, spec } => {
            let outcome = reconciler.update(&id, &spec.into_spec()).await?;
            let effective_id = outcome.effective_id(&id).to_owned();
            let outcome = outcome.into_result(&id)?;
            emit(&json!({ "id": effective_id, "update": outcome }))
        }
        NetworkCommand::Delete { id } => {
            reconciler.delete(&id).await?;
            emit(&json!({ "id": id, "deleted": true }))
        }
    }
}
