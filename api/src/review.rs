use crate::{is_false, RoleGraphReviewStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PODS_PER_SUBJECT: usize = 20;
pub const DEFAULT_MAX_WORKLOADS_PER_POD: usize = 10;

/// A role graph query and, once answered, its result.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleGraphReview {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,

    #[serde(default)]
    pub spec: RoleGraphReviewSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoleGraphReviewStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleGraphReviewSpec {
    #[serde(default, skip_serializing_if = "Selector::is_empty")]
    pub selector: Selector,

    #[serde(default)]
    pub match_mode: MatchMode,

    #[serde(default)]
    pub wildcard_mode: WildcardMode,

    #[serde(default, skip_serializing_if = "is_false")]
    pub include_rule_metadata: bool,

    #[serde(default, skip_serializing_if = "NamespaceScope::is_empty")]
    pub namespace_scope: NamespaceScope,

    #[serde(default, skip_serializing_if = "is_false")]
    pub include_pods: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub include_workloads: bool,

    #[serde(default)]
    pub pod_phase_mode: PodPhaseMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods_per_subject: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workloads_per_pod: Option<usize>,

    #[serde(default, rename = "filterPhantomAPIs", skip_serializing_if = "is_false")]
    pub filter_phantom_apis: bool,
}

/// Constrains which policy rules are considered. Empty fields are
/// unconstrained; `"*"` is permitted everywhere except `resourceNames`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,

    #[serde(default, rename = "nonResourceURLs", skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub strict: bool,
}

/// Quantifier applied across the values of each selector field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// How `"*"` is interpreted during matching: `expand` gives it wildcard
/// semantics, `exact` treats it as a literal token.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WildcardMode {
    #[default]
    Expand,
    Exact,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PodPhaseMode {
    /// Pending, Running, or Unknown.
    #[default]
    Active,
    Running,
    All,
}

// === impl RoleGraphReview ===

impl RoleGraphReview {
    pub fn ensure_defaults(&mut self) {
        if self.api_version.trim().is_empty() {
            self.api_version = crate::API_VERSION.to_string();
        }
        if self.kind.trim().is_empty() {
            self.kind = crate::KIND.to_string();
        }
    }
}

// === impl RoleGraphReviewSpec ===

impl RoleGraphReviewSpec {
    /// The effective pod cap per subject; requests of zero fall back to the
    /// default.
    pub fn max_pods_per_subject(&self) -> usize {
        match self.max_pods_per_subject {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_PODS_PER_SUBJECT,
        }
    }

    /// The effective workload-chain cap per pod.
    pub fn max_workloads_per_pod(&self) -> usize {
        match self.max_workloads_per_pod {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_WORKLOADS_PER_POD,
        }
    }

    /// Reconciles dependent flags, returning a warning for each implicit
    /// flip. `includeWorkloads` requires the pod layer of the graph.
    pub fn normalize_runtime_flags(&mut self) -> Option<&'static str> {
        if self.include_workloads && !self.include_pods {
            self.include_pods = true;
            return Some(
                "includeWorkloads=true requires includePods=true; includePods was enabled automatically",
            );
        }
        None
    }
}

// === impl Selector ===

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.api_groups.is_empty()
            && self.resources.is_empty()
            && self.verbs.is_empty()
            && self.resource_names.is_empty()
            && self.non_resource_urls.is_empty()
    }

    pub fn has_resource_query(&self) -> bool {
        !self.api_groups.is_empty()
            || !self.resources.is_empty()
            || !self.resource_names.is_empty()
    }

    pub fn has_non_resource_query(&self) -> bool {
        !self.non_resource_urls.is_empty()
    }
}

// === impl NamespaceScope ===

impl NamespaceScope {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && !self.strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec: RoleGraphReviewSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.match_mode, MatchMode::Any);
        assert_eq!(spec.wildcard_mode, WildcardMode::Expand);
        assert_eq!(spec.pod_phase_mode, PodPhaseMode::Active);
        assert_eq!(spec.max_pods_per_subject(), DEFAULT_MAX_PODS_PER_SUBJECT);
        assert_eq!(spec.max_workloads_per_pod(), DEFAULT_MAX_WORKLOADS_PER_POD);
        assert!(!spec.include_rule_metadata);
        assert!(!spec.filter_phantom_apis);
    }

    #[test]
    fn spec_rejects_unknown_enum_values() {
        assert!(serde_json::from_str::<RoleGraphReviewSpec>(r#"{"matchMode": "some"}"#).is_err());
        assert!(
            serde_json::from_str::<RoleGraphReviewSpec>(r#"{"wildcardMode": "fuzzy"}"#).is_err()
        );
        assert!(
            serde_json::from_str::<RoleGraphReviewSpec>(r#"{"podPhaseMode": "paused"}"#).is_err()
        );
    }

    #[test]
    fn include_workloads_implies_include_pods() {
        let mut spec = RoleGraphReviewSpec {
            include_workloads: true,
            ..Default::default()
        };
        let warning = spec.normalize_runtime_flags();
        assert!(spec.include_pods);
        assert!(warning.unwrap().contains("includePods was enabled"));

        // A second normalization is a no-op.
        assert!(spec.normalize_runtime_flags().is_none());
    }

    #[test]
    fn selector_field_names_round_trip() {
        let selector = Selector {
            api_groups: vec!["".to_string()],
            resources: vec!["pods/exec".to_string()],
            non_resource_urls: vec!["/healthz".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&selector).unwrap();
        assert!(json.get("apiGroups").is_some());
        assert!(json.get("nonResourceURLs").is_some());
        let parsed: Selector = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, selector);
    }
}
