//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::sync::Arc;

use berth_common::ReconcileConfig;
use berth_core::{
    new_registry, Compensation, MigrationError, MigrationPhase, NetworkReconciler, NetworkSpec,
    NetworkUpdate, ReconcileError, ReconcileMetrics, StepOutcome,
};
use berth_runtime::RuntimeError;
use berth_testharness::{MemoryRuntime, Operation as Call, RuntimeCall};

struct Fixture {
    runtime: Arc<MemoryRuntime>,
    reconciler: NetworkReconciler,
    old: String,
    containers: Vec<String>,
}

/// `frontend` (bridge) with `c1`, `c2`, `c3` attached, plus `bystander` on another network.
fn fixture() -> Fixture {
    let runtime = Arc::new(MemoryRuntime::new());
    let old = runtime.seed_network("frontend", "bridge");
    let other = runtime.seed_network("backend", "bridge");
    let containers: Vec<String> = ["c1", "c2", "c3"]
        .iter()
        .map(|name| {
            let id = runtime.seed_container(name, "alpine");
            runtime.attach(&id, &old);
            id
        })
        .collect();
    let bystander = runtime.seed_container("bystander", "alpine");
    runtime.attach(&bystander, &other);
    let reconciler = NetworkReconciler::new(runtime.clone(), &ReconcileConfig::default());
    Fixture {
        runtime,
        reconciler,
        old,
        containers,
    }
}

fn overlay() -> NetworkSpec {
    NetworkSpec::new("frontend").with_driver("overlay")
}

fn migration_error(err: ReconcileError) -> MigrationError {
    match err {
        ReconcileError::Migration(inner) => *inner,
        other => panic!("expected migration error, got {other:?}"),
    }
}

#[tokio::test]
async fn driver_change_moves_every_container() {
    let f = fixture();
    let outcome = f.reconciler.update(&f.old, &overlay()).await.unwrap();
    let NetworkUpdate::Migrated(report) = &outcome else {
        panic!("expected migration, got {outcome:?}");
    };

    assert_ne!(report.new_network_id, f.old);
    assert_eq!(outcome.effective_id(&f.old), report.new_network_id);
    assert!(report.new_network_name.starts_with("frontend-"));
    assert_eq!(report.moved, f.containers);
    assert!(report
        .steps
        .iter()
        .all(|step| step.outcome == StepOutcome::Moved));

    for id in &f.containers {
        assert_eq!(f.runtime.networks_of(id), vec![report.new_network_id.clone()]);
    }
    let state = f.reconciler.read(&report.new_network_id).await.unwrap();
    assert_eq!(state.driver, "overlay");

    // old network is left in place, empty
    assert!(f.runtime.has_network(&f.old));
    assert!(f.runtime.members_of(&f.old).is_empty());
    assert!(f.runtime.calls_for(Call::RemoveNetwork).is_empty());
}

#[tokio::test]
async fn containers_move_in_list_order_with_forced_disconnect() {
    let f = fixture();
    f.reconciler.update(&f.old, &overlay()).await.unwrap();

    let moves: Vec<(String, String)> = f
        .runtime
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RuntimeCall::DisconnectNetwork {
                container_id,
                force,
                ..
            } => {
                assert!(force);
                Some(("disconnect".to_string(), container_id))
            }
            RuntimeCall::ConnectNetwork { container_id, .. } => {
                Some(("connect".to_string(), container_id))
            }
            _ => None,
        })
        .collect();
    let expected: Vec<(String, String)> = f
        .containers
        .iter()
        .flat_map(|id| {
            [
                ("disconnect".to_string(), id.clone()),
                ("connect".to_string(), id.clone()),
            ]
        })
        .collect();
    assert_eq!(moves, expected);
}

#[tokio::test]
async fn failing_disconnect_on_second_container_stops_the_run() {
    let f = fixture();
    let (c1, c2, c3) = (&f.containers[0], &f.containers[1], &f.containers[2]);
    f.runtime.fail_once(
        Call::DisconnectNetwork,
        Some(c2),
        RuntimeError::Transport("connection reset by peer".into()),
    );

    let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
    let new = err.new_network_id.clone().expect("replacement was created");

    assert_eq!(err.phase, MigrationPhase::ContainersMigrating);
    assert_eq!(err.moved, vec![c1.clone()]);
    assert_eq!(err.failed.as_deref(), Some(c2.as_str()));
    assert_eq!(err.pending, vec![c3.clone()]);
    assert_eq!(err.compensation, Compensation::NotNeeded);
    assert!(err.to_string().contains(c2.as_str()));

    assert_eq!(f.runtime.networks_of(c1), vec![new.clone()]);
    assert_eq!(f.runtime.networks_of(c2), vec![f.old.clone()]);
    assert_eq!(f.runtime.networks_of(c3), vec![f.old.clone()]);
    assert!(f.runtime.has_network(&f.old));
}

#[tokio::test]
async fn k_of_n_failure_partitions_containers() {
    for k in 0..3 {
        let f = fixture();
        let failing = f.containers[k].clone();
        f.runtime.fail_once(
            Call::DisconnectNetwork,
            Some(&failing),
            RuntimeError::Api {
                status: 500,
                message: "daemon busy".into(),
            },
        );

        let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
        let new = err.new_network_id.clone().unwrap();
        assert_eq!(err.failed.as_deref(), Some(failing.as_str()));
        assert_eq!(err.moved, f.containers[..k].to_vec());
        assert_eq!(err.pending, f.containers[k + 1..].to_vec());

        for (index, id) in f.containers.iter().enumerate() {
            let expected = if index < k { &new } else { &f.old };
            assert_eq!(&f.runtime.networks_of(id), &vec![expected.clone()], "k={k} i={index}");
        }
    }
}

#[tokio::test]
async fn failed_connect_is_compensated_by_reattaching_old_network() {
    let f = fixture();
    let c2 = f.containers[1].clone();
    f.runtime.fail_once(
        Call::ConnectNetwork,
        Some(&c2),
        RuntimeError::Api {
            status: 500,
            message: "no free address".into(),
        },
    );

    let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
    assert_eq!(err.compensation, Compensation::RolledBack);
    assert!(matches!(
        err.steps.last().map(|step| &step.outcome),
        Some(StepOutcome::ConnectFailed {
            compensation: Compensation::RolledBack,
            ..
        })
    ));
    assert_eq!(f.runtime.networks_of(&c2), vec![f.old.clone()]);
}

#[tokio::test]
async fn failed_compensation_reports_stranded_container() {
    let f = fixture();
    let c1 = f.containers[0].clone();
    f.runtime.fail_always(
        Call::ConnectNetwork,
        Some(&c1),
        RuntimeError::Transport("socket closed".into()),
    );

    let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
    assert_eq!(err.compensation, Compensation::Stranded);
    assert!(err.moved.is_empty());
    assert!(f.runtime.networks_of(&c1).is_empty());
}

#[tokio::test]
async fn replacement_create_failure_aborts_during_planning() {
    let f = fixture();
    f.runtime.fail_once(
        Call::CreateNetwork,
        None,
        RuntimeError::Api {
            status: 400,
            message: "overlay requires swarm mode".into(),
        },
    );

    let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
    assert_eq!(err.phase, MigrationPhase::Planning);
    assert!(err.new_network_id.is_none());
    assert!(err.moved.is_empty());
    assert!(f.runtime.calls_for(Call::ListContainers).is_empty());
    for id in &f.containers {
        assert_eq!(f.runtime.networks_of(id), vec![f.old.clone()]);
    }
}

#[tokio::test]
async fn enumeration_failure_reports_created_replacement() {
    let f = fixture();
    f.runtime.fail_once(
        Call::ListContainers,
        None,
        RuntimeError::Transport("timed out".into()),
    );

    let err = migration_error(f.reconciler.update(&f.old, &overlay()).await.unwrap_err());
    assert_eq!(err.phase, MigrationPhase::NewNetworkCreated);
    let new = err.new_network_id.expect("replacement id is reported");
    assert!(f.runtime.has_network(&new));
    assert!(f.runtime.calls_for(Call::DisconnectNetwork).is_empty());
}

#[tokio::test]
async fn empty_network_migrates_without_moves() {
    let runtime = Arc::new(MemoryRuntime::new());
    let old = runtime.seed_network("frontend", "bridge");
    let reconciler = NetworkReconciler::new(runtime.clone(), &ReconcileConfig::default());

    let outcome = reconciler.update(&old, &overlay()).await.unwrap();
    let NetworkUpdate::Migrated(report) = outcome else {
        panic!("expected migration");
    };
    assert!(report.moved.is_empty());
    assert!(report.steps.is_empty());
}

#[tokio::test]
async fn migrations_are_counted() {
    let f = fixture();
    let registry = new_registry();
    let metrics = ReconcileMetrics::new(registry.clone()).unwrap();
    let reconciler = f.reconciler.clone().with_metrics(metrics);
    f.runtime.fail_once(
        Call::DisconnectNetwork,
        Some(&f.containers[2]),
        RuntimeError::Transport("reset".into()),
    );

    reconciler.update(&f.old, &overlay()).await.unwrap_err();

    let families = registry.gather();
    let value = |name: &str, outcome: &str| -> u64 {
        families
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == "outcome" && label.get_value() == outcome)
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    };
    assert_eq!(value("berth_migration_containers_total", "moved"), 2);
    assert_eq!(value("berth_migration_containers_total", "failed"), 1);
    assert_eq!(value("berth_migrations_total", "failed"), 1);
}
