//! Produces the view of a snapshot a scoped caller is allowed to query.

use crate::scope::AccessScope;
use crate::snapshot::Snapshot;
use std::sync::Arc;

/// Returns a snapshot restricted to what `scope` allows. An unrestricted
/// scope returns the same `Arc` — the common case costs nothing. Otherwise a
/// fresh snapshot is assembled from the surviving records: inverted indexes
/// are rebuilt from surviving rules only and aggregation edges are pruned to
/// surviving roles.
pub fn scoped(snapshot: &Arc<Snapshot>, scope: &AccessScope) -> Arc<Snapshot> {
    if scope.is_unrestricted() {
        return snapshot.clone();
    }

    let mut out = Snapshot::empty();
    out.built_at = snapshot.built_at;
    out.warnings = snapshot.warnings.clone();
    out.known_gaps = snapshot.known_gaps.clone();

    for record in snapshot.roles_by_id.values() {
        if scope.allow_role(&record.namespace) {
            out.insert_role(record.clone());
        }
    }

    for (key, bindings) in &snapshot.bindings_by_role_ref {
        let kept: Vec<_> = bindings
            .iter()
            .filter(|b| scope.allow_binding(&b.namespace))
            .cloned()
            .collect();
        if !kept.is_empty() {
            out.bindings_by_role_ref.insert(key.clone(), kept);
        }
    }

    // Aggregation edges survive only when the target did, and only towards
    // sources that did.
    for (target, sources) in &snapshot.aggregated_role_sources {
        if !out.roles_by_id.contains_key(target) {
            continue;
        }
        let kept: Vec<_> = sources
            .iter()
            .filter(|src| out.roles_by_id.contains_key(*src))
            .cloned()
            .collect();
        if !kept.is_empty() {
            out.aggregated_role_sources.insert(target.clone(), kept);
        }
    }

    for (key, pods) in &snapshot.pods_by_service_account {
        let kept: Vec<_> = pods
            .iter()
            .filter(|p| scope.allow_pod(&p.namespace))
            .cloned()
            .collect();
        if !kept.is_empty() {
            out.pods_by_service_account.insert(key.clone(), kept);
        }
    }

    for (uid, workload) in &snapshot.workloads_by_uid {
        if scope.allow_workload(&workload.namespace) {
            out.workloads_by_uid.insert(uid.clone(), workload.clone());
        }
    }

    out.sort();
    Arc::new(out)
}
