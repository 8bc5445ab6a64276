use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// A role's scope: namespaced or cluster-wide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Role,
    ClusterRole,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    RoleBinding,
    ClusterRoleBinding,
}

/// Structural identity of a role: `lower(kind) + ":" + [ns + "/"] + name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(String);

/// Identifies the role a binding points at. The namespace is empty for
/// cluster-role references; for a namespaced binding referencing a Role it is
/// the binding's namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleRefKey {
    pub kind: RoleKind,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAccountKey {
    pub namespace: String,
    pub name: String,
}

/// One RBAC policy rule. All five lists are sets semantically; they are
/// stored as-received for traceability and collapsed during indexing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    pub resource_names: Vec<String>,
    pub non_resource_urls: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    User { name: String },
    Group { name: String },
    ServiceAccount { namespace: String, name: String },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RoleRecord {
    pub uid: String,
    pub kind: RoleKind,
    /// Empty for cluster roles.
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub rules: Vec<PolicyRule>,
}

#[derive(Clone, Debug)]
pub struct BindingRecord {
    pub uid: String,
    pub kind: BindingKind,
    /// Empty for cluster-role bindings.
    pub namespace: String,
    pub name: String,
    pub role_ref: RoleRefKey,
    pub subjects: Vec<Subject>,
}

#[derive(Clone, Debug)]
pub struct PodRecord {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub service_account: String,
    pub phase: PodPhase,
    pub owner_references: Vec<OwnerRef>,
}

/// A controller object a pod (transitively) belongs to: Deployment,
/// ReplicaSet, StatefulSet, DaemonSet, Job, or CronJob.
#[derive(Clone, Debug)]
pub struct WorkloadRecord {
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub owner_references: Vec<OwnerRef>,
}

// === impl RoleKind ===

impl RoleKind {
    /// Lowercased form used in stable identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::ClusterRole => "clusterrole",
        }
    }
}

impl Default for RoleKind {
    fn default() -> Self {
        Self::Role
    }
}

// === impl BindingKind ===

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleBinding => "rolebinding",
            Self::ClusterRoleBinding => "clusterrolebinding",
        }
    }
}

// === impl RoleId ===

impl RoleId {
    pub fn new(kind: RoleKind, namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(format!("{}:{}", kind.as_str(), name))
        } else {
            Self(format!("{}:{}/{}", kind.as_str(), namespace, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// === impl RoleRefKey ===

impl RoleRefKey {
    /// The id of the role this key resolves to.
    pub fn role_id(&self) -> RoleId {
        RoleId::new(self.kind, &self.namespace, &self.name)
    }
}

// === impl RoleRecord ===

impl RoleRecord {
    pub fn role_id(&self) -> RoleId {
        RoleId::new(self.kind, &self.namespace, &self.name)
    }

    pub fn role_ref_key(&self) -> RoleRefKey {
        RoleRefKey {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

// === impl Subject ===

impl Subject {
    pub fn name(&self) -> &str {
        match self {
            Self::User { name } | Self::Group { name } | Self::ServiceAccount { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::ServiceAccount { namespace, .. } => namespace,
            _ => "",
        }
    }
}

// === impl PodPhase ===

impl PodPhase {
    /// Parses the `status.phase` string; anything unrecognized is Unknown.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

/// Pods with no explicit service account run as `default`.
pub fn normalize_service_account_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_SERVICE_ACCOUNT.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_id_encoding() {
        assert_eq!(
            RoleId::new(RoleKind::ClusterRole, "", "edit").as_str(),
            "clusterrole:edit"
        );
        assert_eq!(
            RoleId::new(RoleKind::Role, "team", "reader").as_str(),
            "role:team/reader"
        );
    }

    #[test]
    fn service_account_name_normalization() {
        assert_eq!(normalize_service_account_name(""), "default");
        assert_eq!(normalize_service_account_name("  "), "default");
        assert_eq!(normalize_service_account_name(" demo-sa "), "demo-sa");
    }

    #[test]
    fn pod_phase_parsing() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
        assert_eq!(PodPhase::parse(""), PodPhase::Unknown);
    }
}
