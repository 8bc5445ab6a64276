use crate::index::{meta_strings, to_owner_refs, Index};
use rbacgraph_controller_core::{normalize_service_account_name, PodPhase, PodRecord};
use rbacgraph_controller_k8s_api as k8s;
use std::sync::Arc;

fn to_pod_record(pod: k8s::Pod) -> PodRecord {
    let (uid, namespace, name) = meta_strings(&pod.metadata);
    let service_account = normalize_service_account_name(
        pod.spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.as_deref())
            .unwrap_or_default(),
    );
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(PodPhase::parse)
        .unwrap_or_default();
    PodRecord {
        uid,
        namespace,
        name,
        service_account,
        phase,
        owner_references: to_owner_refs(pod.metadata.owner_references),
    }
}

impl Index {
    pub(crate) fn apply_pod(&mut self, pod: k8s::Pod) {
        let record = to_pod_record(pod);
        let key = (record.namespace.clone(), record.name.clone());
        self.pods.insert(key, Arc::new(record));
        self.touch();
    }

    pub(crate) fn delete_pod(&mut self, namespace: String, name: String) {
        if self.pods.remove(&(namespace, name)).is_some() {
            self.touch();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        self.apply_pod(pod);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_pod(namespace, name);
    }

    fn reset(&mut self, pods: Vec<k8s::Pod>, _removed: kubert::index::NamespacedRemoved) {
        self.pods.clear();
        for pod in pods {
            self.apply_pod(pod);
        }
        self.mark_synced("pods");
        self.touch();
    }
}
