//! Evaluates a caller's own RBAC against the snapshot to decide which parts
//! of it the caller may see. The scope is the conjunction of six probes, one
//! per resource category the query engine reads.

use crate::record::{PolicyRule, Subject};
use crate::snapshot::Snapshot;
use ahash::AHashSet as HashSet;
use rbacgraph_controller_api::NamespaceScope;

const PROBE_CLUSTER_ROLES: usize = 0;
const PROBE_CLUSTER_ROLE_BINDINGS: usize = 1;
const PROBE_ROLES: usize = 2;
const PROBE_ROLE_BINDINGS: usize = 3;
const PROBE_PODS: usize = 4;
const PROBE_DEPLOYMENTS: usize = 5;
const PROBE_COUNT: usize = 6;

struct ResourceProbe {
    resource: &'static str,
    api_group: &'static str,
}

const PROBES: [ResourceProbe; PROBE_COUNT] = [
    ResourceProbe {
        resource: "clusterroles",
        api_group: "rbac.authorization.k8s.io",
    },
    ResourceProbe {
        resource: "clusterrolebindings",
        api_group: "rbac.authorization.k8s.io",
    },
    ResourceProbe {
        resource: "roles",
        api_group: "rbac.authorization.k8s.io",
    },
    ResourceProbe {
        resource: "rolebindings",
        api_group: "rbac.authorization.k8s.io",
    },
    ResourceProbe {
        resource: "pods",
        api_group: "",
    },
    ResourceProbe {
        resource: "deployments",
        api_group: "apps",
    },
];

/// The identity a request was authenticated as.
#[derive(Clone, Debug, Default)]
pub struct Caller {
    pub name: String,
    pub groups: Vec<String>,
}

/// What a caller may list, per resource category. A `None` namespace set
/// means cluster-wide access was granted for that category.
#[derive(Clone, Debug, Default)]
pub struct AccessScope {
    pub can_list_cluster_roles: bool,
    pub can_list_cluster_role_bindings: bool,

    pub can_list_roles: bool,
    pub allowed_role_namespaces: Option<HashSet<String>>,

    pub can_list_role_bindings: bool,
    pub allowed_binding_namespaces: Option<HashSet<String>>,

    pub can_list_pods: bool,
    pub allowed_pod_namespaces: Option<HashSet<String>>,

    pub can_list_workloads: bool,
    pub allowed_workload_namespaces: Option<HashSet<String>>,
}

#[derive(Default)]
struct GrantSet {
    cluster_wide: [bool; PROBE_COUNT],
    namespaced: [Option<HashSet<String>>; PROBE_COUNT],
}

// === impl AccessScope ===

impl AccessScope {
    /// True when every category is visible cluster-wide; the snapshot filter
    /// short-circuits on this.
    pub fn is_unrestricted(&self) -> bool {
        self.can_list_cluster_roles
            && self.can_list_cluster_role_bindings
            && self.can_list_roles
            && self.allowed_role_namespaces.is_none()
            && self.can_list_role_bindings
            && self.allowed_binding_namespaces.is_none()
            && self.can_list_pods
            && self.allowed_pod_namespaces.is_none()
            && self.can_list_workloads
            && self.allowed_workload_namespaces.is_none()
    }

    pub fn allow_role(&self, namespace: &str) -> bool {
        allow_ns(
            namespace,
            self.can_list_cluster_roles,
            self.can_list_roles,
            self.allowed_role_namespaces.as_ref(),
        )
    }

    pub fn allow_binding(&self, namespace: &str) -> bool {
        allow_ns(
            namespace,
            self.can_list_cluster_role_bindings,
            self.can_list_role_bindings,
            self.allowed_binding_namespaces.as_ref(),
        )
    }

    pub fn allow_pod(&self, namespace: &str) -> bool {
        allow_ns(
            namespace,
            false,
            self.can_list_pods,
            self.allowed_pod_namespaces.as_ref(),
        )
    }

    pub fn allow_workload(&self, namespace: &str) -> bool {
        allow_ns(
            namespace,
            false,
            self.can_list_workloads,
            self.allowed_workload_namespaces.as_ref(),
        )
    }
}

/// Cluster-scoped objects (empty namespace) are gated on `cluster_wide`;
/// namespaced objects pass on an all-namespaces grant or set membership.
fn allow_ns(
    namespace: &str,
    cluster_wide: bool,
    all_namespaces: bool,
    allowed: Option<&HashSet<String>>,
) -> bool {
    if namespace.is_empty() {
        return cluster_wide;
    }
    if all_namespaces {
        return true;
    }
    match allowed {
        Some(allowed) => allowed.contains(namespace),
        None => false,
    }
}

/// Evaluates the caller's bindings in the snapshot and restricts the result
/// to `namespaces_to_check` (the namespaces actually present, intersected
/// with the request's scope).
pub fn resolve_access_scope(
    snapshot: &Snapshot,
    caller: &Caller,
    namespaces_to_check: &[String],
) -> AccessScope {
    let mut grants = GrantSet::default();

    for (role_ref, bindings) in &snapshot.bindings_by_role_ref {
        let role = match snapshot.roles_by_id.get(&role_ref.role_id()) {
            Some(role) => role,
            None => continue,
        };
        for binding in bindings {
            if !subject_matches(caller, &binding.subjects) {
                continue;
            }
            apply_rule_grants(&mut grants, &role.rules, &binding.namespace);
        }
    }

    build_scope(&grants, namespaces_to_check)
}

/// The namespaces the scope resolver needs verdicts for: those occurring in
/// the snapshot, optionally intersected with the request's namespace scope.
pub fn namespaces_to_check(snapshot: &Snapshot, scope: &NamespaceScope) -> Vec<String> {
    let mut set = HashSet::default();
    let mut add = |ns: &str| {
        if !ns.is_empty() {
            set.insert(ns.to_string());
        }
    };
    for record in snapshot.roles_by_id.values() {
        add(&record.namespace);
    }
    for bindings in snapshot.bindings_by_role_ref.values() {
        for binding in bindings {
            add(&binding.namespace);
        }
    }
    for key in snapshot.pods_by_service_account.keys() {
        add(&key.namespace);
    }
    for workload in snapshot.workloads_by_uid.values() {
        add(&workload.namespace);
    }

    if !scope.namespaces.is_empty() {
        let requested: HashSet<&String> = scope.namespaces.iter().collect();
        set.retain(|ns| requested.contains(ns));
    }

    set.into_iter().collect()
}

fn apply_rule_grants(grants: &mut GrantSet, rules: &[PolicyRule], binding_namespace: &str) {
    for rule in rules {
        if !verb_allows(&rule.verbs, "list") {
            continue;
        }
        for (idx, probe) in PROBES.iter().enumerate() {
            if !rule_covers(rule, probe.resource, probe.api_group) {
                continue;
            }
            if binding_namespace.is_empty() {
                grants.cluster_wide[idx] = true;
            } else if !grants.cluster_wide[idx] {
                grants.namespaced[idx]
                    .get_or_insert_with(HashSet::default)
                    .insert(binding_namespace.to_string());
            }
        }
    }
}

fn build_scope(grants: &GrantSet, namespaces_to_check: &[String]) -> AccessScope {
    let filtered = |idx: usize| -> Option<HashSet<String>> {
        if grants.cluster_wide[idx] {
            return None;
        }
        let allowed = match &grants.namespaced[idx] {
            Some(allowed) => allowed,
            None => return Some(HashSet::default()),
        };
        Some(
            namespaces_to_check
                .iter()
                .filter(|ns| allowed.contains(*ns))
                .cloned()
                .collect(),
        )
    };

    AccessScope {
        can_list_cluster_roles: grants.cluster_wide[PROBE_CLUSTER_ROLES],
        can_list_cluster_role_bindings: grants.cluster_wide[PROBE_CLUSTER_ROLE_BINDINGS],
        can_list_roles: grants.cluster_wide[PROBE_ROLES],
        allowed_role_namespaces: filtered(PROBE_ROLES),
        can_list_role_bindings: grants.cluster_wide[PROBE_ROLE_BINDINGS],
        allowed_binding_namespaces: filtered(PROBE_ROLE_BINDINGS),
        can_list_pods: grants.cluster_wide[PROBE_PODS],
        allowed_pod_namespaces: filtered(PROBE_PODS),
        can_list_workloads: grants.cluster_wide[PROBE_DEPLOYMENTS],
        allowed_workload_namespaces: filtered(PROBE_DEPLOYMENTS),
    }
}

fn subject_matches(caller: &Caller, subjects: &[Subject]) -> bool {
    subjects.iter().any(|subject| match subject {
        Subject::User { name } => *name == caller.name,
        Subject::Group { name } => caller.groups.iter().any(|g| g == name),
        Subject::ServiceAccount { namespace, name } => {
            // Service accounts authenticate under their conventional
            // identity string.
            caller.name == format!("system:serviceaccount:{}:{}", namespace, name)
        }
    })
}

fn verb_allows(verbs: &[String], target: &str) -> bool {
    verbs.iter().any(|v| v == target || v == "*")
}

fn rule_covers(rule: &PolicyRule, resource: &str, api_group: &str) -> bool {
    let resource_matches = rule.resources.iter().any(|r| r == resource || r == "*");
    if !resource_matches {
        return false;
    }
    rule.api_groups.iter().any(|g| g == api_group || g == "*")
}
