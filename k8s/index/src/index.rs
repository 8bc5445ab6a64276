use crate::metrics::Metrics;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use rbacgraph_controller_core::{
    BindingRecord, OwnerRef, PodRecord, PolicyRule, RoleId, RoleRecord, Snapshot, WorkloadRecord,
};
use rbacgraph_controller_k8s_api::{self as k8s, labels};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Duration, MissedTickBehavior};

pub type SharedIndex = Arc<RwLock<Index>>;

pub(crate) type ObjKey = (String, String);

/// (kind, namespace, name) — workload controllers of every kind share one
/// arena.
pub(crate) type WorkloadKey = (&'static str, String, String);

/// Raw per-kind object caches, updated by watch events and read by the
/// rebuild task. Event handlers do nothing beyond updating a cache entry and
/// signalling the change.
#[derive(Debug, Default)]
pub struct Index {
    pub(crate) roles: HashMap<ObjKey, Arc<RoleRecord>>,
    pub(crate) cluster_roles: HashMap<String, ClusterRoleEntry>,
    pub(crate) role_bindings: HashMap<ObjKey, Arc<BindingRecord>>,
    pub(crate) cluster_role_bindings: HashMap<String, Arc<BindingRecord>>,
    pub(crate) pods: HashMap<ObjKey, Arc<PodRecord>>,
    pub(crate) workloads: HashMap<WorkloadKey, Arc<WorkloadRecord>>,

    /// Kinds whose watch has delivered its initial object list. Kinds still
    /// missing at build time are surfaced as snapshot warnings rather than
    /// failing the build.
    pub(crate) synced: HashSet<&'static str>,

    changes: Arc<Notify>,
}

#[derive(Debug)]
pub(crate) struct ClusterRoleEntry {
    pub(crate) record: Arc<RoleRecord>,
    pub(crate) has_aggregation_rule: bool,
    pub(crate) aggregation_selectors: Vec<k8s::LabelSelector>,
}

pub(crate) const ALL_KINDS: [&str; 11] = [
    "roles",
    "clusterroles",
    "rolebindings",
    "clusterrolebindings",
    "pods",
    "deployments",
    "replicasets",
    "statefulsets",
    "daemonsets",
    "jobs",
    "cronjobs",
];

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// The change signal shared with the rebuild task. `Notify` keeps a
    /// single stored permit, so event bursts collapse naturally.
    pub fn changes(&self) -> Arc<Notify> {
        self.changes.clone()
    }

    pub(crate) fn touch(&self) {
        self.changes.notify_one();
    }

    pub(crate) fn mark_synced(&mut self, kind: &'static str) {
        self.synced.insert(kind);
    }

    /// Assembles a fresh snapshot from the raw caches. Never fails: kinds
    /// whose watch has not synced contribute a warning and whatever records
    /// are already cached.
    pub fn build_snapshot(&self) -> Snapshot {
        let mut next = Snapshot::empty();

        for kind in ALL_KINDS {
            if !self.synced.contains(kind) {
                next.warnings
                    .push(format!("{} cache not synced; results may be incomplete", kind));
            }
        }

        for record in self.roles.values() {
            next.insert_role(record.clone());
        }
        for entry in self.cluster_roles.values() {
            next.insert_role(entry.record.clone());
            // An aggregation rule with no resolved rules means the upstream
            // controller hasn't filled the role in yet.
            if entry.has_aggregation_rule && entry.record.rules.is_empty() {
                next.known_gaps.push(format!(
                    "clusterrole/{} has aggregationRule but resolved rules are empty",
                    entry.record.name
                ));
            }
        }
        self.resolve_aggregation(&mut next);

        for binding in self.role_bindings.values() {
            next.insert_binding(binding.clone());
        }
        for binding in self.cluster_role_bindings.values() {
            next.insert_binding(binding.clone());
        }
        for pod in self.pods.values() {
            next.insert_pod(pod.clone());
        }
        for workload in self.workloads.values() {
            next.insert_workload(workload.clone());
        }

        next.warnings.sort();
        next.known_gaps.sort();
        next.sort();
        next
    }

    /// For each cluster-role carrying an aggregation rule, evaluates its
    /// selectors against all cluster-roles (self excluded) and records the
    /// sorted source ids. An invalid selector contributes nothing beyond a
    /// warning.
    fn resolve_aggregation(&self, next: &mut Snapshot) {
        if self.cluster_roles.is_empty() {
            return;
        }

        // (label-key, label-value) → cluster-roles, so plain match-labels
        // selectors probe instead of scanning.
        let mut label_index: HashMap<(&str, &str), Vec<&ClusterRoleEntry>> = HashMap::default();
        for entry in self.cluster_roles.values() {
            for (key, value) in &entry.record.labels {
                label_index
                    .entry((key.as_str(), value.as_str()))
                    .or_default()
                    .push(entry);
            }
        }

        for target in self.cluster_roles.values() {
            if !target.has_aggregation_rule || target.aggregation_selectors.is_empty() {
                continue;
            }

            let mut sources: HashSet<RoleId> = HashSet::default();
            for raw_selector in &target.aggregation_selectors {
                let selector = match labels::Selector::try_from(raw_selector.clone()) {
                    Ok(selector) => selector,
                    Err(error) => {
                        next.warnings.push(format!(
                            "clusterrole/{} has invalid aggregation selector: {}",
                            target.record.name, error
                        ));
                        continue;
                    }
                };

                let candidates = self.aggregation_candidates(&selector, &label_index);
                for candidate in candidates {
                    if candidate.record.name == target.record.name {
                        continue;
                    }
                    sources.insert(candidate.record.role_id());
                }
            }

            if sources.is_empty() {
                continue;
            }
            let mut sources: Vec<RoleId> = sources.into_iter().collect();
            sources.sort();
            next.aggregated_role_sources
                .insert(target.record.role_id(), sources);
        }
    }

    fn aggregation_candidates<'a>(
        &'a self,
        selector: &labels::Selector,
        label_index: &HashMap<(&str, &str), Vec<&'a ClusterRoleEntry>>,
    ) -> Vec<&'a ClusterRoleEntry> {
        // Pure match-labels selectors intersect the per-label candidate
        // lists; anything with expressions falls back to a scan.
        if !selector.has_expressions() {
            if let Some(match_labels) = selector.match_labels() {
                if !match_labels.is_empty() {
                    let mut result: Option<Vec<&ClusterRoleEntry>> = None;
                    for (key, value) in match_labels {
                        let candidates = label_index
                            .get(&(key.as_str(), value.as_str()))
                            .cloned()
                            .unwrap_or_default();
                        result = Some(match result {
                            None => candidates,
                            Some(base) => {
                                let names: HashSet<&str> = candidates
                                    .iter()
                                    .map(|entry| entry.record.name.as_str())
                                    .collect();
                                base.into_iter()
                                    .filter(|entry| names.contains(entry.record.name.as_str()))
                                    .collect()
                            }
                        });
                    }
                    return result.unwrap_or_default();
                }
            }
        }

        self.cluster_roles
            .values()
            .filter(|entry| selector.matches(&labels::Labels::from(entry.record.labels.clone())))
            .collect()
    }
}

/// The single rebuild loop: waits for a change signal, lets the burst
/// coalesce for one debounce interval, then builds and publishes a snapshot.
/// Events arriving during a build leave a stored permit, so the tail event
/// always produces one more rebuild. A non-zero resync period triggers
/// builds on a timer as well.
pub async fn rebuilds(
    index: SharedIndex,
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    metrics: Metrics,
    debounce: Duration,
    resync: Option<Duration>,
) {
    let changes = index.read().changes();
    let mut resync = resync.map(|period| {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        match resync.as_mut() {
            Some(interval) => {
                tokio::select! {
                    _ = changes.notified() => {}
                    _ = interval.tick() => {}
                }
            }
            None => changes.notified().await,
        }

        time::sleep(debounce).await;

        let snapshot = index.read().build_snapshot();
        tracing::debug!(
            roles = snapshot.roles_by_id.len(),
            bindings = snapshot.bindings_by_role_ref.len(),
            workloads = snapshot.workloads_by_uid.len(),
            "Publishing snapshot"
        );
        metrics.record(&snapshot);
        let _ = snapshot_tx.send(Some(Arc::new(snapshot)));
    }
}

// --- conversion helpers shared by the per-resource modules ---

pub(crate) fn to_policy_rules(rules: Option<Vec<k8s::PolicyRule>>) -> Vec<PolicyRule> {
    rules
        .into_iter()
        .flatten()
        .map(|rule| PolicyRule {
            api_groups: rule.api_groups.unwrap_or_default(),
            resources: rule.resources.unwrap_or_default(),
            verbs: rule.verbs,
            resource_names: rule.resource_names.unwrap_or_default(),
            non_resource_urls: rule.non_resource_urls.unwrap_or_default(),
        })
        .collect()
}

pub(crate) fn to_owner_refs(refs: Option<Vec<k8s::OwnerReference>>) -> Vec<OwnerRef> {
    refs.into_iter()
        .flatten()
        .map(|owner| OwnerRef {
            api_version: owner.api_version,
            kind: owner.kind,
            name: owner.name,
            uid: owner.uid,
            controller: owner.controller.unwrap_or(false),
        })
        .collect()
}

pub(crate) fn meta_strings(meta: &k8s::ObjectMeta) -> (String, String, String) {
    (
        meta.uid.clone().unwrap_or_default(),
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}
