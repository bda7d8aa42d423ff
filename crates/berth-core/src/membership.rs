//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use berth_runtime::{ListOptions, RuntimeClient, RuntimeError};

use crate::network::NetworkState;

/// Ids of every container attached to `network`, in runtime list order.
///
/// Always a fresh full scan, stopped containers included. A container matches on
/// the network id or on the network name, since the engine keys per-container
/// network maps by name.
pub async fn containers_on_network(
    runtime: &dyn RuntimeClient,
    network: &NetworkState,
) -> Result<Vec<String>, RuntimeError> {
    let containers = runtime.list_containers(&ListOptions { all: true }).await?;
    Ok(containers
        .into_iter()
        .filter(|summary| summary.is_attached_to(&network.id, Some(&network.name)))
        .map(|summary| summary.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use berth_testharness::MemoryRuntime;

    use super::*;

    #[tokio::test]
    async fn scans_in_list_order_and_skips_other_networks() {
        let runtime = MemoryRuntime::new();
        let frontend = runtime.seed_network("frontend", "bridge");
        let backend = runtime.seed_network("backend", "bridge");
        let c1 = runtime.seed_container("c1", "alpine");
        let c2 = runtime.seed_container("c2", "alpine");
        let c3 = runtime.seed_container("c3", "alpine");
        runtime.attach(&c1, &frontend);
        runtime.attach(&c2, &backend);
        runtime.attach(&c3, &frontend);

        let state = NetworkState {
            id: frontend,
            name: "frontend".into(),
            driver: "bridge".into(),
        };
        let members = containers_on_network(&runtime, &state).await.unwrap();
        assert_eq!(members, vec![c1, c3]);
    }
}
