use crate::{is_false, is_zero};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleGraphReviewStatus {
    pub matched_roles: usize,
    pub matched_bindings: usize,
    pub matched_subjects: usize,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub matched_pods: usize,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub matched_workloads: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_gaps: Vec<String>,

    pub graph: Graph,

    pub resource_map: Vec<ResourceMapRow>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum GraphNodeType {
    #[default]
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    User,
    Group,
    ServiceAccount,
    Pod,
    Workload,
    PodOverflow,
    WorkloadOverflow,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum GraphEdgeType {
    /// Source cluster-role contributes rules to an aggregated cluster-role.
    Aggregates,
    /// Role is referenced by a binding.
    #[default]
    Grants,
    /// Binding targets a subject.
    Subjects,
    /// Service account is used by a pod.
    RunsAs,
    /// Owner-reference chain.
    OwnedBy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,

    #[serde(rename = "type")]
    pub node_type: GraphNodeType,

    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub aggregated: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregation_sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rule_refs: Vec<RuleRef>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_phase: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workload_kind: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub hidden_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,

    pub from: String,

    pub to: String,

    #[serde(rename = "type")]
    pub edge_type: GraphEdgeType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_refs: Vec<RuleRef>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explain: String,
}

/// Witnesses a single matched access: one (group, resource, verb) cell of a
/// policy rule, with provenance and annotations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subresource: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verb: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,

    #[serde(default, rename = "nonResourceURLs", skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,

    #[serde(default, rename = "sourceObjectUID", skip_serializing_if = "String::is_empty")]
    pub source_object_uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_rule_index: Option<usize>,

    /// The rule names an api-group or resource the cluster does not serve.
    #[serde(default, skip_serializing_if = "is_false")]
    pub phantom: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unsupported_verb: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_refs: Vec<RuleRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verb: String,

    pub role_count: usize,
    pub binding_count: usize,
    pub subject_count: usize,
}

// === impl GraphNodeType ===

impl GraphNodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::ClusterRole => "clusterRole",
            Self::RoleBinding => "roleBinding",
            Self::ClusterRoleBinding => "clusterRoleBinding",
            Self::User => "user",
            Self::Group => "group",
            Self::ServiceAccount => "serviceAccount",
            Self::Pod => "pod",
            Self::Workload => "workload",
            Self::PodOverflow => "podOverflow",
            Self::WorkloadOverflow => "workloadOverflow",
        }
    }
}

impl std::fmt::Display for GraphNodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl GraphEdgeType ===

impl GraphEdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregates => "aggregates",
            Self::Grants => "grants",
            Self::Subjects => "subjects",
            Self::RunsAs => "runsAs",
            Self::OwnedBy => "ownedBy",
        }
    }
}

impl std::fmt::Display for GraphEdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_wire_values() {
        for (node_type, wire) in [
            (GraphNodeType::ClusterRole, "\"clusterRole\""),
            (GraphNodeType::ServiceAccount, "\"serviceAccount\""),
            (GraphNodeType::PodOverflow, "\"podOverflow\""),
        ] {
            assert_eq!(serde_json::to_string(&node_type).unwrap(), wire);
        }
    }

    #[test]
    fn empty_annotations_are_omitted() {
        let ruleref = RuleRef {
            api_group: "".to_string(),
            resource: "pods".to_string(),
            verb: "get".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&ruleref).unwrap();
        assert!(json.get("phantom").is_none());
        assert!(json.get("unsupportedVerb").is_none());
        assert!(json.get("expandedRefs").is_none());
        assert!(json.get("sourceObjectUID").is_none());
    }

    #[test]
    fn status_always_carries_graph_and_resource_map() {
        let status = RoleGraphReviewStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("graph").is_some());
        assert!(json.get("resourceMap").is_some());
        assert!(json.get("matchedPods").is_none());
    }
}
