use crate::index::{meta_strings, to_policy_rules, ClusterRoleEntry, Index};
use rbacgraph_controller_core::{RoleKind, RoleRecord};
use rbacgraph_controller_k8s_api as k8s;
use std::sync::Arc;

impl Index {
    pub(crate) fn apply_role(&mut self, role: k8s::Role) {
        let (uid, namespace, name) = meta_strings(&role.metadata);
        let record = Arc::new(RoleRecord {
            uid,
            kind: RoleKind::Role,
            namespace: namespace.clone(),
            name: name.clone(),
            labels: role.metadata.labels.unwrap_or_default(),
            annotations: role.metadata.annotations.unwrap_or_default(),
            rules: to_policy_rules(role.rules),
        });
        self.roles.insert((namespace, name), record);
        self.touch();
    }

    pub(crate) fn delete_role(&mut self, namespace: String, name: String) {
        if self.roles.remove(&(namespace, name)).is_some() {
            self.touch();
        }
    }

    pub(crate) fn apply_cluster_role(&mut self, role: k8s::ClusterRole) {
        let (uid, _, name) = meta_strings(&role.metadata);
        let record = Arc::new(RoleRecord {
            uid,
            kind: RoleKind::ClusterRole,
            namespace: String::new(),
            name: name.clone(),
            labels: role.metadata.labels.unwrap_or_default(),
            annotations: role.metadata.annotations.unwrap_or_default(),
            rules: to_policy_rules(role.rules),
        });
        let (has_aggregation_rule, aggregation_selectors) = match role.aggregation_rule {
            Some(aggregation) => (true, aggregation.cluster_role_selectors.unwrap_or_default()),
            None => (false, Vec::new()),
        };
        self.cluster_roles.insert(
            name,
            ClusterRoleEntry {
                record,
                has_aggregation_rule,
                aggregation_selectors,
            },
        );
        self.touch();
    }

    pub(crate) fn delete_cluster_role(&mut self, name: String) {
        if self.cluster_roles.remove(&name).is_some() {
            self.touch();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Role> for Index {
    fn apply(&mut self, role: k8s::Role) {
        self.apply_role(role);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_role(namespace, name);
    }

    fn reset(&mut self, roles: Vec<k8s::Role>, _removed: kubert::index::NamespacedRemoved) {
        self.roles.clear();
        for role in roles {
            self.apply_role(role);
        }
        self.mark_synced("roles");
        self.touch();
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRole> for Index {
    fn apply(&mut self, role: k8s::ClusterRole) {
        self.apply_cluster_role(role);
    }

    fn delete(&mut self, name: String) {
        self.delete_cluster_role(name);
    }

    fn reset(&mut self, roles: Vec<k8s::ClusterRole>, _removed: kubert::index::ClusterRemoved) {
        self.cluster_roles.clear();
        for role in roles {
            self.apply_cluster_role(role);
        }
        self.mark_synced("clusterroles");
        self.touch();
    }
}
