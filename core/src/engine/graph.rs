use super::QueryContext;
use crate::record::{BindingRecord, PodRecord, RoleId, RoleKind, RoleRecord, Subject, WorkloadRecord};
use ahash::AHashSet as HashSet;
use rbacgraph_controller_api::{GraphEdge, GraphEdgeType, GraphNode, GraphNodeType, RuleRef};

pub(super) const EXPLAIN_AGGREGATES: &str = "ClusterRole contributes rules via aggregationRule";
pub(super) const EXPLAIN_GRANTS: &str = "Role referenced by binding";
pub(super) const EXPLAIN_SUBJECTS: &str = "Binding targets subject";
pub(super) const EXPLAIN_RUNS_AS: &str = "ServiceAccount used by pod";
pub(super) const EXPLAIN_OWNED_BY: &str = "Owner reference chain";

pub(super) fn role_node_id(role: &RoleRecord) -> String {
    if role.namespace.is_empty() {
        format!("role:{}:{}", role.kind.as_str(), role.name)
    } else {
        format!("role:{}:{}/{}", role.kind.as_str(), role.namespace, role.name)
    }
}

pub(super) fn binding_node_id(binding: &BindingRecord) -> String {
    if binding.namespace.is_empty() {
        format!("binding:{}:{}", binding.kind.as_str(), binding.name)
    } else {
        format!(
            "binding:{}:{}/{}",
            binding.kind.as_str(),
            binding.namespace,
            binding.name
        )
    }
}

pub(super) fn subject_node_id(subject: &Subject) -> String {
    let kind = subject_type(subject);
    match subject {
        Subject::ServiceAccount { namespace, name } if !namespace.is_empty() => {
            format!("subject:{}:{}/{}", kind.as_str(), namespace, name)
        }
        _ => format!("subject:{}:{}", kind.as_str(), subject.name()),
    }
}

pub(super) fn pod_node_id(pod: &PodRecord) -> String {
    format!("pod:{}/{}", pod.namespace, pod.name)
}

pub(super) fn workload_node_id(workload: &WorkloadRecord) -> String {
    format!(
        "workload:{}:{}/{}",
        workload.kind.to_ascii_lowercase(),
        workload.namespace,
        workload.name
    )
}

pub(super) fn pod_overflow_node_id(subject_node_id: &str) -> String {
    format!("overflow:pod:{}", subject_node_id)
}

pub(super) fn workload_overflow_node_id(pod_node_id: &str) -> String {
    format!("overflow:workload:{}", pod_node_id)
}

pub(super) fn edge_id(from: &str, to: &str, edge_type: GraphEdgeType) -> String {
    format!("edge:{}->{}:{}", from, to, edge_type.as_str())
}

pub(super) fn role_type(role: &RoleRecord) -> GraphNodeType {
    match role.kind {
        RoleKind::ClusterRole => GraphNodeType::ClusterRole,
        RoleKind::Role => GraphNodeType::Role,
    }
}

pub(super) fn binding_type(binding: &BindingRecord) -> GraphNodeType {
    match binding.kind {
        crate::record::BindingKind::ClusterRoleBinding => GraphNodeType::ClusterRoleBinding,
        crate::record::BindingKind::RoleBinding => GraphNodeType::RoleBinding,
    }
}

pub(super) fn subject_type(subject: &Subject) -> GraphNodeType {
    match subject {
        Subject::User { .. } => GraphNodeType::User,
        Subject::Group { .. } => GraphNodeType::Group,
        Subject::ServiceAccount { .. } => GraphNodeType::ServiceAccount,
    }
}

// === impl QueryContext: graph mutation ===

impl QueryContext<'_> {
    /// Inserts the role node or merges aggregation sources and matched refs
    /// into the already-present one, returning its stable id.
    pub(super) fn upsert_role_node(
        &mut self,
        role: &RoleRecord,
        aggregation_sources: &[RoleId],
        matched_refs: &[RuleRef],
    ) -> String {
        let id = role_node_id(role);

        if self.node_seen.insert(id.clone()) {
            let mut node = GraphNode {
                id: id.clone(),
                node_type: role_type(role),
                name: role.name.clone(),
                namespace: role.namespace.clone(),
                labels: role.labels.clone(),
                annotations: role.annotations.clone(),
                ..Default::default()
            };
            if !aggregation_sources.is_empty() {
                node.aggregated = true;
                node.aggregation_sources = aggregation_sources
                    .iter()
                    .map(|source| source.to_string())
                    .collect();
            }
            if !matched_refs.is_empty() {
                node.matched_rule_refs = matched_refs.to_vec();
            }
            self.status.graph.nodes.push(node);
            self.node_index
                .insert(id.clone(), self.status.graph.nodes.len() - 1);
            return id;
        }

        if let Some(&idx) = self.node_index.get(&id) {
            let node = &mut self.status.graph.nodes[idx];
            if !aggregation_sources.is_empty() {
                node.aggregated = true;
                let incoming: Vec<String> = aggregation_sources
                    .iter()
                    .map(|source| source.to_string())
                    .collect();
                node.aggregation_sources =
                    merge_sorted_unique_strings(&node.aggregation_sources, &incoming);
            }
            if !matched_refs.is_empty() {
                node.matched_rule_refs = merge_rule_refs(&node.matched_rule_refs, matched_refs);
            }
        }

        id
    }

    /// Returns true when the node was actually added.
    pub(super) fn add_node_if_missing(&mut self, node: GraphNode) -> bool {
        if !self.node_seen.insert(node.id.clone()) {
            return false;
        }
        self.status.graph.nodes.push(node);
        true
    }

    pub(super) fn append_edge_if_missing(&mut self, edge: GraphEdge) {
        if !self.edge_seen.insert(edge.id.clone()) {
            return;
        }
        self.status.graph.edges.push(edge);
    }

    pub(super) fn add_warning(&mut self, warning: String) {
        let trimmed = warning.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.warning_seen.insert(trimmed.to_string()) {
            self.status.warnings.push(trimmed.to_string());
        }
    }
}

fn merge_sorted_unique_strings(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = HashSet::default();
    let mut merged: Vec<String> = existing
        .iter()
        .chain(incoming.iter())
        .filter(|value| seen.insert((*value).clone()))
        .cloned()
        .collect();
    merged.sort();
    merged
}

fn merge_rule_refs(existing: &[RuleRef], incoming: &[RuleRef]) -> Vec<RuleRef> {
    let mut seen: HashSet<RuleRef> = HashSet::default();
    existing
        .iter()
        .chain(incoming.iter())
        .filter(|rule_ref| seen.insert((*rule_ref).clone()))
        .cloned()
        .collect()
}
