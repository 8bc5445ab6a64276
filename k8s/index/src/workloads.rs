use crate::index::{meta_strings, to_owner_refs, Index};
use rbacgraph_controller_core::WorkloadRecord;
use rbacgraph_controller_k8s_api as k8s;
use std::sync::Arc;

impl Index {
    fn apply_workload(
        &mut self,
        api_version: &'static str,
        kind: &'static str,
        meta: k8s::ObjectMeta,
    ) {
        let (uid, namespace, name) = meta_strings(&meta);
        // Owner chains are resolved by UID; a record without one can never
        // be reached.
        if uid.is_empty() {
            return;
        }
        let record = Arc::new(WorkloadRecord {
            uid,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.clone(),
            name: name.clone(),
            owner_references: to_owner_refs(meta.owner_references),
        });
        self.workloads.insert((kind, namespace, name), record);
        self.touch();
    }

    fn delete_workload(&mut self, kind: &'static str, namespace: String, name: String) {
        if self.workloads.remove(&(kind, namespace, name)).is_some() {
            self.touch();
        }
    }

    fn reset_workloads(
        &mut self,
        api_version: &'static str,
        kind: &'static str,
        sync_key: &'static str,
        metas: Vec<k8s::ObjectMeta>,
    ) {
        self.workloads.retain(|(k, _, _), _| *k != kind);
        for meta in metas {
            self.apply_workload(api_version, kind, meta);
        }
        self.mark_synced(sync_key);
        self.touch();
    }
}

macro_rules! workload_index {
    ($resource:ty, $api_version:literal, $kind:literal, $sync_key:literal) => {
        impl kubert::index::IndexNamespacedResource<$resource> for Index {
            fn apply(&mut self, resource: $resource) {
                self.apply_workload($api_version, $kind, resource.metadata);
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.delete_workload($kind, namespace, name);
            }

            fn reset(
                &mut self,
                resources: Vec<$resource>,
                _removed: kubert::index::NamespacedRemoved,
            ) {
                self.reset_workloads(
                    $api_version,
                    $kind,
                    $sync_key,
                    resources.into_iter().map(|r| r.metadata).collect(),
                );
            }
        }
    };
}

workload_index!(k8s::Deployment, "apps/v1", "Deployment", "deployments");
workload_index!(k8s::ReplicaSet, "apps/v1", "ReplicaSet", "replicasets");
workload_index!(k8s::StatefulSet, "apps/v1", "StatefulSet", "statefulsets");
workload_index!(k8s::DaemonSet, "apps/v1", "DaemonSet", "daemonsets");
workload_index!(k8s::Job, "batch/v1", "Job", "jobs");
workload_index!(k8s::CronJob, "batch/v1", "CronJob", "cronjobs");
