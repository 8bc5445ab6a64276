use super::graph::{
    edge_id, pod_node_id, pod_overflow_node_id, workload_node_id, workload_overflow_node_id,
    EXPLAIN_OWNED_BY, EXPLAIN_RUNS_AS,
};
use super::{allow_namespace, QueryContext};
use crate::record::{OwnerRef, PodPhase, PodRecord, ServiceAccountKey, Subject, WorkloadRecord};
use ahash::AHashSet as HashSet;
use rbacgraph_controller_api::{GraphEdge, GraphEdgeType, GraphNode, GraphNodeType, PodPhaseMode};
use std::sync::Arc;

const MAX_OWNER_DEPTH: usize = 8;

/// A service-account subject seen during graph assembly, remembered for
/// runtime-chain expansion.
#[derive(Clone, Debug)]
pub(super) struct SubjectServiceAccount {
    pub(super) subject_node_id: String,
    pub(super) namespace: String,
    pub(super) service_account: String,
}

impl SubjectServiceAccount {
    fn service_account_key(&self) -> ServiceAccountKey {
        ServiceAccountKey {
            namespace: self.namespace.clone(),
            name: self.service_account.clone(),
        }
    }
}

impl QueryContext<'_> {
    pub(super) fn track_service_account_subject(
        &mut self,
        subject_node_id: &str,
        subject: &Subject,
        binding_namespace: &str,
    ) {
        let (namespace, name) = match subject {
            Subject::ServiceAccount { namespace, name } => (namespace, name),
            _ => return,
        };
        // Bindings may omit the subject namespace; it defaults to the
        // binding's own.
        let mut namespace = namespace.trim();
        if namespace.is_empty() {
            namespace = binding_namespace.trim();
        }
        self.sa_subjects.insert(
            subject_node_id.to_string(),
            SubjectServiceAccount {
                subject_node_id: subject_node_id.to_string(),
                namespace: namespace.to_string(),
                service_account: name.clone(),
            },
        );
    }

    pub(super) fn expand_runtime_chain(&mut self) {
        if !self.spec.include_pods {
            return;
        }

        for subject in self.sorted_service_accounts() {
            if subject.namespace.is_empty() {
                self.add_warning(format!(
                    "subject {} has empty namespace and was skipped for runtime expansion",
                    subject.subject_node_id
                ));
                continue;
            }
            if !allow_namespace(
                self.namespace_filter.as_ref(),
                &subject.namespace,
                self.namespace_strict,
            ) {
                continue;
            }

            let pods = self
                .snapshot
                .pods_by_service_account
                .get(&subject.service_account_key())
                .map(|pods| self.filter_pods(pods))
                .unwrap_or_default();
            if pods.is_empty() {
                continue;
            }

            let visible = pods.len().min(self.spec.max_pods_per_subject());
            for pod in &pods[..visible] {
                let pod_id = pod_node_id(pod);
                if self.add_node_if_missing(GraphNode {
                    id: pod_id.clone(),
                    node_type: GraphNodeType::Pod,
                    name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    pod_phase: pod.phase.as_str().to_string(),
                    ..Default::default()
                }) {
                    self.pod_seen.insert(pod_id.clone());
                }
                self.append_edge_if_missing(GraphEdge {
                    id: edge_id(&subject.subject_node_id, &pod_id, GraphEdgeType::RunsAs),
                    from: subject.subject_node_id.clone(),
                    to: pod_id.clone(),
                    edge_type: GraphEdgeType::RunsAs,
                    explain: EXPLAIN_RUNS_AS.to_string(),
                    ..Default::default()
                });

                if !self.spec.include_workloads {
                    continue;
                }

                let chain = self.resolve_workload_chain(pod);
                let visible_chain = chain.len().min(self.spec.max_workloads_per_pod());
                let mut parent_id = pod_id.clone();
                for workload in &chain[..visible_chain] {
                    let workload_id = workload_node_id(workload);
                    if self.add_node_if_missing(GraphNode {
                        id: workload_id.clone(),
                        node_type: GraphNodeType::Workload,
                        name: workload.name.clone(),
                        namespace: workload.namespace.clone(),
                        workload_kind: workload.kind.clone(),
                        ..Default::default()
                    }) {
                        self.workload_seen.insert(workload_id.clone());
                    }
                    self.append_edge_if_missing(GraphEdge {
                        id: edge_id(&parent_id, &workload_id, GraphEdgeType::OwnedBy),
                        from: parent_id.clone(),
                        to: workload_id.clone(),
                        edge_type: GraphEdgeType::OwnedBy,
                        explain: EXPLAIN_OWNED_BY.to_string(),
                        ..Default::default()
                    });
                    parent_id = workload_id;
                }

                let hidden_workloads = chain.len() - visible_chain;
                if hidden_workloads > 0 {
                    let overflow_id = workload_overflow_node_id(&pod_id);
                    self.add_node_if_missing(GraphNode {
                        id: overflow_id.clone(),
                        node_type: GraphNodeType::WorkloadOverflow,
                        name: format!("+{} workloads", hidden_workloads),
                        namespace: pod.namespace.clone(),
                        synthetic: true,
                        hidden_count: hidden_workloads,
                        ..Default::default()
                    });
                    self.append_edge_if_missing(GraphEdge {
                        id: edge_id(&parent_id, &overflow_id, GraphEdgeType::OwnedBy),
                        from: parent_id.clone(),
                        to: overflow_id,
                        edge_type: GraphEdgeType::OwnedBy,
                        explain: "Workload chain truncated by limit".to_string(),
                        ..Default::default()
                    });
                }
            }

            let hidden_pods = pods.len() - visible;
            if hidden_pods > 0 {
                let overflow_id = pod_overflow_node_id(&subject.subject_node_id);
                self.add_node_if_missing(GraphNode {
                    id: overflow_id.clone(),
                    node_type: GraphNodeType::PodOverflow,
                    name: format!("+{} pods", hidden_pods),
                    namespace: subject.namespace.clone(),
                    synthetic: true,
                    hidden_count: hidden_pods,
                    ..Default::default()
                });
                self.append_edge_if_missing(GraphEdge {
                    id: edge_id(
                        &subject.subject_node_id,
                        &overflow_id,
                        GraphEdgeType::RunsAs,
                    ),
                    from: subject.subject_node_id.clone(),
                    to: overflow_id,
                    edge_type: GraphEdgeType::RunsAs,
                    explain: "Pod list truncated by limit".to_string(),
                    ..Default::default()
                });
            }
        }
    }

    /// Expansion order is deterministic regardless of discovery order.
    fn sorted_service_accounts(&self) -> Vec<SubjectServiceAccount> {
        let mut subjects: Vec<SubjectServiceAccount> = self.sa_subjects.values().cloned().collect();
        subjects.sort_by(|a, b| {
            (&a.namespace, &a.service_account, &a.subject_node_id)
                .cmp(&(&b.namespace, &b.service_account, &b.subject_node_id))
        });
        subjects
    }

    fn filter_pods(&self, pods: &[Arc<PodRecord>]) -> Vec<Arc<PodRecord>> {
        pods.iter()
            .filter(|pod| {
                allow_namespace(
                    self.namespace_filter.as_ref(),
                    &pod.namespace,
                    self.namespace_strict,
                ) && pod_phase_matches(pod.phase, self.spec.pod_phase_mode)
            })
            .cloned()
            .collect()
    }

    /// Walks the pod's owner chain through the workload arena. Cycles,
    /// missing records, empty UIDs, and the depth cap all stop the walk with
    /// a warning naming the pod.
    fn resolve_workload_chain(&mut self, pod: &PodRecord) -> Vec<Arc<WorkloadRecord>> {
        let mut current = match choose_owner_reference(&pod.owner_references) {
            Some(owner) => owner,
            None => {
                self.add_warning(format!(
                    "pod {}/{} has no owner reference; workload chain cannot be expanded",
                    pod.namespace, pod.name
                ));
                return Vec::new();
            }
        };

        let mut chain = Vec::with_capacity(MAX_OWNER_DEPTH);
        let mut seen_uids: HashSet<String> = HashSet::default();
        for _ in 0..MAX_OWNER_DEPTH {
            if current.uid.is_empty() {
                self.add_warning(format!(
                    "pod {}/{} owner reference {}/{} has empty UID",
                    pod.namespace, pod.name, current.kind, current.name
                ));
                return chain;
            }
            if !seen_uids.insert(current.uid.clone()) {
                self.add_warning(format!(
                    "pod {}/{} owner chain has cycle at UID {}",
                    pod.namespace, pod.name, current.uid
                ));
                return chain;
            }

            let workload = match self.snapshot.workloads_by_uid.get(&current.uid) {
                Some(workload) => workload.clone(),
                None => {
                    self.add_warning(format!(
                        "pod {}/{} owner {}/{} ({}) not found in workload cache",
                        pod.namespace, pod.name, current.kind, current.name, current.uid
                    ));
                    return chain;
                }
            };
            chain.push(workload.clone());

            match choose_owner_reference(&workload.owner_references) {
                Some(next) => current = next,
                None => return chain,
            }
        }

        self.add_warning(format!(
            "pod {}/{} owner chain was truncated at depth {}",
            pod.namespace, pod.name, MAX_OWNER_DEPTH
        ));
        chain
    }
}

fn pod_phase_matches(phase: PodPhase, mode: PodPhaseMode) -> bool {
    match mode {
        PodPhaseMode::All => true,
        PodPhaseMode::Running => phase == PodPhase::Running,
        PodPhaseMode::Active => matches!(
            phase,
            PodPhase::Pending | PodPhase::Running | PodPhase::Unknown
        ),
    }
}

/// Picks the owner to follow: the sole owner, or the first after preferring
/// controller-flagged references and tie-breaking on the lower-cased
/// (api-version, kind, name, uid) key.
fn choose_owner_reference(refs: &[OwnerRef]) -> Option<OwnerRef> {
    match refs {
        [] => None,
        [only] => Some(only.clone()),
        _ => {
            let mut candidates = refs.to_vec();
            candidates.sort_by(|left, right| {
                right
                    .controller
                    .cmp(&left.controller)
                    .then_with(|| owner_ref_sort_key(left).cmp(&owner_ref_sort_key(right)))
            });
            candidates.into_iter().next()
        }
    }
}

fn owner_ref_sort_key(owner: &OwnerRef) -> String {
    format!(
        "{}|{}|{}|{}",
        owner.api_version.to_lowercase(),
        owner.kind.to_lowercase(),
        owner.name.to_lowercase(),
        owner.uid
    )
}
