use crate::index::{meta_strings, Index};
use rbacgraph_controller_core::{BindingKind, BindingRecord, RoleKind, RoleRefKey, Subject};
use rbacgraph_controller_k8s_api as k8s;
use std::sync::Arc;

/// For a namespaced binding referencing a Role, the role lives in the
/// binding's namespace; any reference to a ClusterRole is cluster-scoped.
fn to_role_ref_key(role_ref: &k8s::RoleRef, binding_namespace: &str) -> RoleRefKey {
    let kind = if role_ref.kind.eq_ignore_ascii_case("Role") {
        RoleKind::Role
    } else {
        RoleKind::ClusterRole
    };
    let namespace = if kind == RoleKind::Role && !binding_namespace.is_empty() {
        binding_namespace.to_string()
    } else {
        String::new()
    };
    RoleRefKey {
        kind,
        namespace,
        name: role_ref.name.clone(),
    }
}

fn to_subjects(subjects: Option<Vec<k8s::Subject>>) -> Vec<Subject> {
    subjects
        .into_iter()
        .flatten()
        .map(|subject| {
            if subject.kind.eq_ignore_ascii_case("Group") {
                Subject::Group { name: subject.name }
            } else if subject.kind.eq_ignore_ascii_case("ServiceAccount") {
                Subject::ServiceAccount {
                    namespace: subject.namespace.unwrap_or_default(),
                    name: subject.name,
                }
            } else {
                Subject::User { name: subject.name }
            }
        })
        .collect()
}

impl Index {
    pub(crate) fn apply_role_binding(&mut self, binding: k8s::RoleBinding) {
        let (uid, namespace, name) = meta_strings(&binding.metadata);
        let record = Arc::new(BindingRecord {
            uid,
            kind: BindingKind::RoleBinding,
            namespace: namespace.clone(),
            name: name.clone(),
            role_ref: to_role_ref_key(&binding.role_ref, &namespace),
            subjects: to_subjects(binding.subjects),
        });
        self.role_bindings.insert((namespace, name), record);
        self.touch();
    }

    pub(crate) fn delete_role_binding(&mut self, namespace: String, name: String) {
        if self.role_bindings.remove(&(namespace, name)).is_some() {
            self.touch();
        }
    }

    pub(crate) fn apply_cluster_role_binding(&mut self, binding: k8s::ClusterRoleBinding) {
        let (uid, _, name) = meta_strings(&binding.metadata);
        let record = Arc::new(BindingRecord {
            uid,
            kind: BindingKind::ClusterRoleBinding,
            namespace: String::new(),
            name: name.clone(),
            role_ref: to_role_ref_key(&binding.role_ref, ""),
            subjects: to_subjects(binding.subjects),
        });
        self.cluster_role_bindings.insert(name, record);
        self.touch();
    }

    pub(crate) fn delete_cluster_role_binding(&mut self, name: String) {
        if self.cluster_role_bindings.remove(&name).is_some() {
            self.touch();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::RoleBinding> for Index {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        self.apply_role_binding(binding);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_role_binding(namespace, name);
    }

    fn reset(&mut self, bindings: Vec<k8s::RoleBinding>, _removed: kubert::index::NamespacedRemoved) {
        self.role_bindings.clear();
        for binding in bindings {
            self.apply_role_binding(binding);
        }
        self.mark_synced("rolebindings");
        self.touch();
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRoleBinding> for Index {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        self.apply_cluster_role_binding(binding);
    }

    fn delete(&mut self, name: String) {
        self.delete_cluster_role_binding(name);
    }

    fn reset(
        &mut self,
        bindings: Vec<k8s::ClusterRoleBinding>,
        _removed: kubert::index::ClusterRemoved,
    ) {
        self.cluster_role_bindings.clear();
        for binding in bindings {
            self.apply_cluster_role_binding(binding);
        }
        self.mark_synced("clusterrolebindings");
        self.touch();
    }
}
