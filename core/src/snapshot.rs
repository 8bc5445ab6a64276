use crate::record::{
    BindingRecord, PodRecord, PolicyRule, RoleId, RoleRecord, RoleRefKey, ServiceAccountKey,
    WorkloadRecord,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use rbacgraph_controller_api::{Selector, WildcardMode};
use std::sync::Arc;

/// One point-in-time view of all RBAC-relevant cluster objects plus derived
/// indexes. Built by the indexer, published behind an `Arc`, and never
/// mutated afterwards; queries borrow it for their whole duration.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub built_at: DateTime<Utc>,

    pub roles_by_id: HashMap<RoleId, Arc<RoleRecord>>,
    pub bindings_by_role_ref: HashMap<RoleRefKey, Vec<Arc<BindingRecord>>>,

    /// Aggregated cluster-role id → sorted ids of the cluster-roles whose
    /// rules contribute to it.
    pub aggregated_role_sources: HashMap<RoleId, Vec<RoleId>>,

    pub pods_by_service_account: HashMap<ServiceAccountKey, Vec<Arc<PodRecord>>>,
    pub workloads_by_uid: HashMap<String, Arc<WorkloadRecord>>,

    /// Inverted indexes: normalized token → roles whose rules mention it.
    /// The literal `"*"` is a bucket of its own.
    pub role_ids_by_api_group: HashMap<String, HashSet<RoleId>>,
    pub role_ids_by_resource: HashMap<String, HashSet<RoleId>>,
    pub role_ids_by_verb: HashMap<String, HashSet<RoleId>>,

    /// Key-set of `roles_by_id`, sorted lexicographically.
    pub all_role_ids: Vec<RoleId>,

    pub warnings: Vec<String>,
    pub known_gaps: Vec<String>,
}

// === impl Snapshot ===

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            built_at: Utc::now(),
            roles_by_id: HashMap::default(),
            bindings_by_role_ref: HashMap::default(),
            aggregated_role_sources: HashMap::default(),
            pods_by_service_account: HashMap::default(),
            workloads_by_uid: HashMap::default(),
            role_ids_by_api_group: HashMap::default(),
            role_ids_by_resource: HashMap::default(),
            role_ids_by_verb: HashMap::default(),
            all_role_ids: Vec::new(),
            warnings: Vec::new(),
            known_gaps: Vec::new(),
        }
    }

    /// Adds a role and indexes its rule tokens.
    pub fn insert_role(&mut self, record: Arc<RoleRecord>) {
        let id = record.role_id();
        self.index_rule_tokens(&id, &record.rules);
        self.all_role_ids.push(id.clone());
        self.roles_by_id.insert(id, record);
    }

    pub fn insert_binding(&mut self, record: Arc<BindingRecord>) {
        self.bindings_by_role_ref
            .entry(record.role_ref.clone())
            .or_default()
            .push(record);
    }

    pub fn insert_pod(&mut self, record: Arc<PodRecord>) {
        let key = ServiceAccountKey {
            namespace: record.namespace.clone(),
            name: record.service_account.clone(),
        };
        self.pods_by_service_account
            .entry(key)
            .or_default()
            .push(record);
    }

    pub fn insert_workload(&mut self, record: Arc<WorkloadRecord>) {
        if record.uid.is_empty() {
            return;
        }
        self.workloads_by_uid.insert(record.uid.clone(), record);
    }

    /// Establishes the ordering invariants after all inserts are done.
    pub fn sort(&mut self) {
        self.all_role_ids.sort();
        for pods in self.pods_by_service_account.values_mut() {
            pods.sort_by(|a, b| {
                (&a.namespace, &a.name, &a.uid).cmp(&(&b.namespace, &b.name, &b.uid))
            });
        }
    }

    pub(crate) fn index_rule_tokens(&mut self, role_id: &RoleId, rules: &[PolicyRule]) {
        for rule in rules {
            for group in normalized_tokens(&rule.api_groups) {
                insert_token(&mut self.role_ids_by_api_group, group, role_id);
            }
            for resource in normalized_tokens(&rule.resources) {
                if resource.is_empty() {
                    continue;
                }
                insert_token(&mut self.role_ids_by_resource, resource, role_id);
            }
            for verb in normalized_tokens(&rule.verbs) {
                if verb.is_empty() {
                    continue;
                }
                insert_token(&mut self.role_ids_by_verb, verb, role_id);
            }
        }
    }

    /// Selects the roles worth matching against a selector by intersecting
    /// the inverted-index buckets of its tokens. An unconstrained selector
    /// yields every role. The result is sorted so downstream graph
    /// construction is deterministic.
    pub fn candidate_role_ids(&self, selector: &Selector, wildcard_mode: WildcardMode) -> Vec<RoleId> {
        let exact = wildcard_mode == WildcardMode::Exact;
        let mut constraints = Vec::with_capacity(3);

        if !selector.api_groups.is_empty() {
            constraints.push(collect_matches(
                &self.role_ids_by_api_group,
                &selector.api_groups,
                exact,
            ));
        }
        if !selector.resources.is_empty() {
            constraints.push(collect_matches(
                &self.role_ids_by_resource,
                &selector.resources,
                exact,
            ));
        }
        if !selector.verbs.is_empty() {
            constraints.push(collect_matches(&self.role_ids_by_verb, &selector.verbs, exact));
        }

        let mut constraints = constraints.into_iter();
        let intersected = match constraints.next() {
            None => return self.all_role_ids.clone(),
            Some(first) => constraints.try_fold(first, |acc, next| {
                let out = intersect(acc, next);
                if out.is_empty() {
                    None
                } else {
                    Some(out)
                }
            }),
        };

        let mut out: Vec<RoleId> = match intersected {
            Some(set) => set.into_iter().collect(),
            None => return Vec::new(),
        };
        out.sort();
        out
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn collect_matches(
    index: &HashMap<String, HashSet<RoleId>>,
    requested: &[String],
    exact: bool,
) -> HashSet<RoleId> {
    let mut matches = HashSet::default();
    for token in requested {
        let normalized = token.trim().to_ascii_lowercase();
        if let Some(bucket) = index.get(&normalized) {
            matches.extend(bucket.iter().cloned());
        }
        // In expand mode, roles with wildcard rules can always match a
        // concrete token, so the "*" bucket joins the union. In exact mode it
        // only participates when the token is itself "*".
        if !exact && normalized != "*" {
            if let Some(bucket) = index.get("*") {
                matches.extend(bucket.iter().cloned());
            }
        }
    }
    matches
}

fn intersect(left: HashSet<RoleId>, right: HashSet<RoleId>) -> HashSet<RoleId> {
    let (small, large) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    small.into_iter().filter(|id| large.contains(id)).collect()
}

fn insert_token(index: &mut HashMap<String, HashSet<RoleId>>, token: String, role_id: &RoleId) {
    index.entry(token).or_default().insert(role_id.clone());
}

/// Lowercases, trims, and de-duplicates the tokens of one rule field.
fn normalized_tokens(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::default();
    values
        .iter()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
