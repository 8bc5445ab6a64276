use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use rbacgraph_controller_core::Snapshot;

/// Rebuild-loop metrics, exposed through the admin server's registry.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    rebuilds: Counter,
    roles: Gauge,
    bindings: Gauge,
    pods: Gauge,
    workloads: Gauge,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "snapshot_rebuilds",
            "Count of snapshot rebuilds",
            metrics.rebuilds.clone(),
        );
        prom.register(
            "snapshot_roles",
            "Gauge of roles in the current snapshot",
            metrics.roles.clone(),
        );
        prom.register(
            "snapshot_bindings",
            "Gauge of bindings in the current snapshot",
            metrics.bindings.clone(),
        );
        prom.register(
            "snapshot_pods",
            "Gauge of pods in the current snapshot",
            metrics.pods.clone(),
        );
        prom.register(
            "snapshot_workloads",
            "Gauge of workload records in the current snapshot",
            metrics.workloads.clone(),
        );
        metrics
    }

    pub(crate) fn record(&self, snapshot: &Snapshot) {
        self.rebuilds.inc();
        self.roles.set(snapshot.roles_by_id.len() as i64);
        self.bindings.set(
            snapshot
                .bindings_by_role_ref
                .values()
                .map(|bindings| bindings.len())
                .sum::<usize>() as i64,
        );
        self.pods.set(
            snapshot
                .pods_by_service_account
                .values()
                .map(|pods| pods.len())
                .sum::<usize>() as i64,
        );
        self.workloads.set(snapshot.workloads_by_uid.len() as i64);
    }
}
