//! ---
//! berth_section: "09-observability"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Prometheus counters for reconciliation and migration outcomes."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::sync::Arc;

use berth_logging::{log_operation, OperationContext, OperationOutcome};
use prometheus::{IntCounterVec, Opts, Registry};

/// Registry shared between the reconcilers and whatever exports it.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics published by the reconcilers.
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: SharedRegistry,
    operations_total: IntCounterVec,
    migration_containers_total: IntCounterVec,
    migrations_total: IntCounterVec,
}

impl ReconcileMetrics {
    /// Register the reconcile metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "berth_reconcile_operations_total",
                "Reconciler operations by resource kind, operation and outcome",
            ),
            &["kind", "operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let migration_containers_total = IntCounterVec::new(
            Opts::new(
                "berth_migration_containers_total",
                "Containers processed by network migrations",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(migration_containers_total.clone()))?;

        let migrations_total = IntCounterVec::new(
            Opts::new(
                "berth_migrations_total",
                "Network migrations by terminal outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(migrations_total.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            migration_containers_total,
            migrations_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_operation(&self, kind: &str, operation: &str, outcome: OperationOutcome) {
        self.operations_total
            .with_label_values(&[kind, operation, outcome.as_str()])
            .inc();
    }

    /// `outcome` is `moved` or `failed`.
    pub fn record_container_move(&self, outcome: &str) {
        self.migration_containers_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// `outcome` is `committed` or `failed`.
    pub fn record_migration(&self, outcome: &str) {
        self.migrations_total.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for ReconcileMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMetrics").finish_non_exhaustive()
    }
}

/// Log an operation event and count it when metrics are enabled.
pub(crate) fn observe(
    metrics: Option<&ReconcileMetrics>,
    context: &OperationContext<'_>,
    message: &str,
    outcome: OperationOutcome,
) {
    log_operation(context, message, outcome);
    if let Some(metrics) = metrics {
        metrics.record_operation(
            context.kind.unwrap_or("unknown"),
            context.operation.unwrap_or("unknown"),
            outcome,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> u64 {
        registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    #[test]
    fn counters_are_registered_and_incremented() {
        let metrics = ReconcileMetrics::new(new_registry()).unwrap();
        metrics.record_operation("container", "create", OperationOutcome::Success);
        metrics.record_operation("container", "create", OperationOutcome::Success);
        metrics.record_container_move("moved");
        metrics.record_migration("failed");

        let registry = metrics.registry();
        assert_eq!(
            counter_value(
                &registry,
                "berth_reconcile_operations_total",
                &[("kind", "container"), ("outcome", "success")]
            ),
            2
        );
        assert_eq!(
            counter_value(&registry, "berth_migration_containers_total", &[("outcome", "moved")]),
            1
        );
        assert_eq!(
            counter_value(&registry, "berth_migrations_total", &[("outcome", "failed")]),
            1
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = new_registry();
        ReconcileMetrics::new(registry.clone()).unwrap();
        assert!(ReconcileMetrics::new(registry).is_err());
    }
}
