//! The query pipeline: candidate selection, rule matching with phantom /
//! wildcard / verb annotation, namespace filtering, graph assembly, and
//! runtime-chain expansion, all inside a per-request context that
//! deduplicates nodes, edges, rows, and warnings.

mod graph;
mod rbac;
mod resource_map;
mod runtime;

use crate::discovery::DiscoveryCache;
use crate::record::{BindingRecord, RoleId};
use crate::snapshot::Snapshot;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use rbacgraph_controller_api::{RoleGraphReviewSpec, RoleGraphReviewStatus};
use std::sync::Arc;

use self::resource_map::{ResourceAccumulator, ResourceRowKey};
use self::runtime::SubjectServiceAccount;

pub(crate) const KNOWN_GAP_RUNTIME_SUBJECTS: &str =
    "runtime chain is currently limited to serviceAccount subjects; user/group subject to workload mapping is not included";

/// Answers a review against one snapshot. The snapshot and discovery cache
/// are borrowed for the duration of the call and never mutated.
pub fn query(
    snapshot: &Snapshot,
    spec: RoleGraphReviewSpec,
    discovery: Option<&DiscoveryCache>,
) -> RoleGraphReviewStatus {
    let mut qc = QueryContext::new(snapshot, spec, discovery);

    let role_ids = snapshot.candidate_role_ids(&qc.spec.selector, qc.spec.wildcard_mode);
    if role_ids.is_empty() {
        return qc.status;
    }

    qc.build_rbac_graph(&role_ids);
    qc.expand_runtime_chain();
    qc.finalize()
}

struct QueryContext<'a> {
    snapshot: &'a Snapshot,
    spec: RoleGraphReviewSpec,
    discovery: Option<&'a DiscoveryCache>,

    status: RoleGraphReviewStatus,

    node_seen: HashSet<String>,
    node_index: HashMap<String, usize>,
    edge_seen: HashSet<String>,

    role_seen: HashSet<RoleId>,
    binding_seen: HashSet<String>,
    subject_seen: HashSet<String>,
    pod_seen: HashSet<String>,
    workload_seen: HashSet<String>,

    resource_rows: HashMap<ResourceRowKey, ResourceAccumulator>,

    namespace_filter: Option<HashSet<String>>,
    namespace_strict: bool,

    /// Service-account subjects discovered during graph assembly, keyed by
    /// subject node id; drives runtime-chain expansion.
    sa_subjects: HashMap<String, SubjectServiceAccount>,

    warning_seen: HashSet<String>,
}

// === impl QueryContext ===

impl<'a> QueryContext<'a> {
    fn new(
        snapshot: &'a Snapshot,
        mut spec: RoleGraphReviewSpec,
        discovery: Option<&'a DiscoveryCache>,
    ) -> Self {
        let mut status = RoleGraphReviewStatus {
            warnings: snapshot.warnings.clone(),
            known_gaps: snapshot.known_gaps.clone(),
            ..Default::default()
        };

        let mut warning_seen: HashSet<String> = status.warnings.iter().cloned().collect();
        if let Some(warning) = spec.normalize_runtime_flags() {
            if warning_seen.insert(warning.to_string()) {
                status.warnings.push(warning.to_string());
            }
        }

        if spec.include_pods && !status.known_gaps.iter().any(|g| g == KNOWN_GAP_RUNTIME_SUBJECTS) {
            status.known_gaps.push(KNOWN_GAP_RUNTIME_SUBJECTS.to_string());
        }

        let namespace_filter = make_namespace_filter(&spec.namespace_scope.namespaces);
        let namespace_strict = spec.namespace_scope.strict;

        Self {
            snapshot,
            spec,
            discovery,
            status,
            node_seen: HashSet::default(),
            node_index: HashMap::default(),
            edge_seen: HashSet::default(),
            role_seen: HashSet::default(),
            binding_seen: HashSet::default(),
            subject_seen: HashSet::default(),
            pod_seen: HashSet::default(),
            workload_seen: HashSet::default(),
            resource_rows: HashMap::default(),
            namespace_filter,
            namespace_strict,
            sa_subjects: HashMap::default(),
            warning_seen,
        }
    }

    fn finalize(mut self) -> RoleGraphReviewStatus {
        self.status.matched_roles = self.role_seen.len();
        self.status.matched_bindings = self.binding_seen.len();
        self.status.matched_subjects = self.subject_seen.len();
        self.status.matched_pods = self.pod_seen.len();
        self.status.matched_workloads = self.workload_seen.len();
        self.status.resource_map = resource_map::collapse_resource_rows(self.resource_rows);

        // These sorts are the sole source of output determinism.
        self.status
            .graph
            .nodes
            .sort_by(|a, b| {
                (a.node_type.as_str(), &a.namespace, &a.name, &a.id)
                    .cmp(&(b.node_type.as_str(), &b.namespace, &b.name, &b.id))
            });
        self.status
            .graph
            .edges
            .sort_by(|a, b| {
                (a.edge_type.as_str(), &a.from, &a.to, &a.id)
                    .cmp(&(b.edge_type.as_str(), &b.from, &b.to, &b.id))
            });

        self.status
    }
}

fn make_namespace_filter(namespaces: &[String]) -> Option<HashSet<String>> {
    let filter: HashSet<String> = namespaces
        .iter()
        .map(|ns| ns.trim())
        .filter(|ns| !ns.is_empty())
        .map(|ns| ns.to_string())
        .collect();
    if filter.is_empty() {
        None
    } else {
        Some(filter)
    }
}

/// Cluster-scoped entities (empty namespace) pass a namespace filter unless
/// the scope is strict.
fn allow_namespace(filter: Option<&HashSet<String>>, namespace: &str, strict: bool) -> bool {
    let filter = match filter {
        Some(filter) => filter,
        None => return true,
    };
    if namespace.is_empty() {
        return !strict;
    }
    filter.contains(namespace)
}

fn filter_bindings(
    filter: Option<&HashSet<String>>,
    strict: bool,
    bindings: &[Arc<BindingRecord>],
) -> Vec<Arc<BindingRecord>> {
    let filter = match filter {
        Some(filter) => filter,
        None => return bindings.to_vec(),
    };
    bindings
        .iter()
        .filter(|binding| {
            if binding.namespace.is_empty() {
                !strict
            } else {
                filter.contains(&binding.namespace)
            }
        })
        .cloned()
        .collect()
}
