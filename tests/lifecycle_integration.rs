//! ---
//! berth_section: "15-testing-qa-runbook"
//! berth_subsection: "integration-tests"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Integration and validation tests for the Berth workspace."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::sync::Arc;

use berth_common::AppConfig;
use berth_core::{
    ContainerNetworkBinder, ContainerReconciler, ContainerSpec, NetworkReconciler, NetworkSpec,
    NetworkUpdate, PortMapping, ReconcileError,
};
use berth_testharness::{MemoryRuntime, Operation as Call};

struct Stack {
    runtime: Arc<MemoryRuntime>,
    containers: ContainerReconciler,
    networks: NetworkReconciler,
    binder: ContainerNetworkBinder,
}

fn stack() -> Stack {
    berth_logging::init();
    let config: AppConfig = "[reconcile]\nmigration_suffix_len = 8\n".parse().unwrap();
    let runtime = Arc::new(MemoryRuntime::new());
    Stack {
        containers: ContainerReconciler::new(runtime.clone(), &config.reconcile),
        networks: NetworkReconciler::new(runtime.clone(), &config.reconcile),
        binder: ContainerNetworkBinder::new(runtime.clone()),
        runtime,
    }
}

fn app(name: &str, external: u32) -> ContainerSpec {
    ContainerSpec::new(name, "nginx:1.25", vec![PortMapping::new(80, external)])
}

#[tokio::test]
async fn declared_topology_survives_driver_change_and_teardown() {
    let s = stack();
    let frontend = s.networks.create(&NetworkSpec::new("frontend")).await.unwrap();

    let mut ids = Vec::new();
    for (index, name) in ["web1", "web2", "web3"].iter().enumerate() {
        let id = s.containers.create(&app(name, 8080 + index as u32)).await.unwrap();
        s.binder.connect(&frontend, &id, None).await.unwrap();
        ids.push(id);
    }
    assert_eq!(s.networks.members(&frontend).await.unwrap(), ids);

    let outcome = s
        .networks
        .update(&frontend, &NetworkSpec::new("frontend").with_driver("overlay"))
        .await
        .unwrap();
    let NetworkUpdate::Migrated(report) = &outcome else {
        panic!("expected migration, got {outcome:?}");
    };
    // `frontend-` plus the configured 8 character suffix
    assert_eq!(report.new_network_name.len(), "frontend-".len() + 8);
    let current = outcome.effective_id(&frontend).to_owned();
    assert_eq!(s.networks.members(&current).await.unwrap(), ids);
    assert!(s.networks.members(&frontend).await.unwrap().is_empty());

    for id in &ids {
        let state = s.containers.read(id).await.unwrap();
        assert_eq!(state.networks.len(), 1);
        assert_eq!(state.networks[0].network_id, current);
    }

    for id in &ids {
        s.containers.delete(id).await.unwrap();
    }
    s.networks.delete(&current).await.unwrap();
    s.networks.delete(&frontend).await.unwrap();
    assert_eq!(s.runtime.container_count(), 0);
    assert_eq!(s.runtime.network_count(), 0);
}

#[tokio::test]
async fn rerun_after_failed_migration_splits_members_across_two_replacements() {
    let s = stack();
    let frontend = s.networks.create(&NetworkSpec::new("frontend")).await.unwrap();
    let mut ids = Vec::new();
    for (index, name) in ["c1", "c2", "c3"].iter().enumerate() {
        let id = s.containers.create(&app(name, 9000 + index as u32)).await.unwrap();
        s.binder.connect(&frontend, &id, None).await.unwrap();
        ids.push(id);
    }
    s.runtime.fail_once(
        Call::DisconnectNetwork,
        Some(&ids[1]),
        berth_runtime::RuntimeError::Transport("connection reset".into()),
    );

    let overlay = NetworkSpec::new("frontend").with_driver("overlay");
    let err = s.networks.update(&frontend, &overlay).await.unwrap_err();
    let ReconcileError::Migration(failure) = err else {
        panic!("expected migration failure, got {err:?}");
    };
    assert_eq!(failure.failed.as_deref(), Some(ids[1].as_str()));
    let first = failure.new_network_id.clone().unwrap();
    assert_eq!(s.networks.members(&first).await.unwrap(), vec![ids[0].clone()]);
    assert_eq!(s.networks.members(&frontend).await.unwrap(), ids[1..].to_vec());

    // a rerun starts a fresh saga with its own replacement; it does not resume the first one
    let outcome = s.networks.update(&frontend, &overlay).await.unwrap();
    let NetworkUpdate::Migrated(report) = outcome else {
        panic!("expected migration");
    };
    assert_ne!(report.new_network_id, first);
    assert_eq!(report.moved, ids[1..].to_vec());
    assert_eq!(
        s.networks.members(&report.new_network_id).await.unwrap(),
        ids[1..].to_vec()
    );
    assert!(s.networks.members(&frontend).await.unwrap().is_empty());

    // c1 is left on the first replacement, which nothing points at any more
    assert_eq!(s.networks.members(&first).await.unwrap(), vec![ids[0].clone()]);
    assert_eq!(s.runtime.network_count(), 3);
}

#[tokio::test]
async fn replacing_a_container_keeps_its_name_available() {
    let s = stack();
    let id = s.containers.create(&app("web1", 8080)).await.unwrap();
    let desired = ContainerSpec::new("web1", "nginx:1.26", vec![PortMapping::new(80, 8080)]);

    let outcome = s.containers.update(&id, &desired).await.unwrap();
    assert!(outcome.into_result(&id).is_err());

    s.containers.delete(&id).await.unwrap();
    let replacement = s.containers.create(&desired).await.unwrap();
    assert_ne!(replacement, id);
    assert_eq!(s.containers.read(&replacement).await.unwrap().image, "nginx:1.26");
}
