use crate::index::{rebuilds, Index, ALL_KINDS};
use crate::metrics::Metrics;
use rbacgraph_controller_core::{PodPhase, RoleKind, Subject};
use rbacgraph_controller_k8s_api as k8s;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio::time::Duration;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn meta(namespace: Option<&str>, name: &str, uid: &str) -> k8s::ObjectMeta {
    k8s::ObjectMeta {
        namespace: namespace.map(|ns| ns.to_string()),
        name: Some(name.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

fn policy_rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> k8s::PolicyRule {
    k8s::PolicyRule {
        api_groups: Some(strings(groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

fn cluster_role(
    name: &str,
    uid: &str,
    rules: Vec<k8s::PolicyRule>,
    labels: Option<BTreeMap<String, String>>,
    aggregation: Option<Vec<k8s::LabelSelector>>,
) -> k8s::ClusterRole {
    k8s::ClusterRole {
        metadata: k8s::ObjectMeta {
            labels,
            ..meta(None, name, uid)
        },
        rules: Some(rules),
        aggregation_rule: aggregation.map(|selectors| k8s::AggregationRule {
            cluster_role_selectors: Some(selectors),
        }),
    }
}

fn label_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn synced(index: &mut Index) {
    for kind in ALL_KINDS {
        index.mark_synced(kind);
    }
}

#[test]
fn indexes_roles_and_tokens() {
    let mut index = Index::default();
    synced(&mut index);
    index.apply_role(k8s::Role {
        metadata: meta(Some("team"), "reader", "uid-r"),
        rules: Some(vec![policy_rule(&[""], &["Pods", "pods"], &["get", "LIST"])]),
    });
    index.apply_cluster_role(cluster_role(
        "admin",
        "uid-a",
        vec![policy_rule(&["*"], &["*"], &["*"])],
        None,
        None,
    ));

    let snapshot = index.build_snapshot();
    let ids: Vec<&str> = snapshot.all_role_ids.iter().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec!["clusterrole:admin", "role:team/reader"]);

    // Tokens are lowercased and de-duplicated; "*" is its own bucket.
    assert_eq!(snapshot.role_ids_by_resource.get("pods").unwrap().len(), 1);
    assert!(snapshot.role_ids_by_verb.contains_key("list"));
    assert_eq!(snapshot.role_ids_by_resource.get("*").unwrap().len(), 1);
    assert!(snapshot.warnings.is_empty());
}

#[test]
fn binding_role_ref_keys_follow_scoping_rules() {
    let mut index = Index::default();
    synced(&mut index);

    index.apply_role_binding(k8s::RoleBinding {
        metadata: meta(Some("team"), "bind-role", "uid-b1"),
        role_ref: k8s::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: "reader".to_string(),
        },
        subjects: Some(vec![k8s::Subject {
            kind: "User".to_string(),
            name: "alice".to_string(),
            ..Default::default()
        }]),
    });
    index.apply_role_binding(k8s::RoleBinding {
        metadata: meta(Some("team"), "bind-cluster-role", "uid-b2"),
        role_ref: k8s::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "admin".to_string(),
        },
        subjects: None,
    });

    let snapshot = index.build_snapshot();
    let keys: Vec<String> = snapshot
        .bindings_by_role_ref
        .keys()
        .map(|key| key.role_id().to_string())
        .collect();
    // A Role reference is scoped to the binding's namespace; a ClusterRole
    // reference is not.
    assert!(keys.contains(&"role:team/reader".to_string()));
    assert!(keys.contains(&"clusterrole:admin".to_string()));
}

#[test]
fn pods_are_normalized_and_sorted() {
    let mut index = Index::default();
    synced(&mut index);

    for (name, sa, phase) in [
        ("pod-b", Some("demo-sa"), "Running"),
        ("pod-a", Some("demo-sa"), "Pending"),
        ("pod-c", None, "Running"),
    ] {
        index.apply_pod(k8s::Pod {
            metadata: meta(Some("team"), name, &format!("uid-{}", name)),
            spec: Some(k8s::PodSpec {
                service_account_name: sa.map(|s| s.to_string()),
                ..Default::default()
            }),
            status: Some(k8s::PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        });
    }

    let snapshot = index.build_snapshot();
    let demo_key = rbacgraph_controller_core::ServiceAccountKey {
        namespace: "team".to_string(),
        name: "demo-sa".to_string(),
    };
    let pods = snapshot.pods_by_service_account.get(&demo_key).unwrap();
    let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["pod-a", "pod-b"]);
    assert_eq!(pods[0].phase, PodPhase::Pending);

    // No explicit service account: the pod runs as "default".
    let default_key = rbacgraph_controller_core::ServiceAccountKey {
        namespace: "team".to_string(),
        name: "default".to_string(),
    };
    assert_eq!(snapshot.pods_by_service_account.get(&default_key).unwrap().len(), 1);
}

#[test]
fn resolves_cluster_role_aggregation() {
    let mut index = Index::default();
    synced(&mut index);

    let selector = k8s::LabelSelector {
        match_labels: Some(label_map(&[("rbac.example.com/aggregate-to-edit", "true")])),
        match_expressions: None,
    };
    index.apply_cluster_role(cluster_role(
        "edit",
        "uid-edit",
        vec![policy_rule(&[""], &["pods"], &["get"])],
        // The target also carries the label; it must not aggregate itself.
        Some(label_map(&[("rbac.example.com/aggregate-to-edit", "true")])),
        Some(vec![selector]),
    ));
    index.apply_cluster_role(cluster_role(
        "source-b",
        "uid-b",
        vec![policy_rule(&[""], &["pods"], &["list"])],
        Some(label_map(&[("rbac.example.com/aggregate-to-edit", "true")])),
        None,
    ));
    index.apply_cluster_role(cluster_role(
        "source-a",
        "uid-a",
        vec![policy_rule(&[""], &["pods"], &["watch"])],
        Some(label_map(&[("rbac.example.com/aggregate-to-edit", "true")])),
        None,
    ));
    index.apply_cluster_role(cluster_role(
        "unrelated",
        "uid-u",
        Vec::new(),
        Some(label_map(&[("other", "label")])),
        None,
    ));

    let snapshot = index.build_snapshot();
    let target = rbacgraph_controller_core::RoleId::new(RoleKind::ClusterRole, "", "edit");
    let sources: Vec<&str> = snapshot.aggregated_role_sources[&target]
        .iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(sources, vec!["clusterrole:source-a", "clusterrole:source-b"]);
}

#[test]
fn aggregation_with_expressions_and_invalid_selectors() {
    let mut index = Index::default();
    synced(&mut index);

    index.apply_cluster_role(cluster_role(
        "target",
        "uid-t",
        vec![policy_rule(&[""], &["pods"], &["get"])],
        None,
        Some(vec![
            k8s::LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![k8s::LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "Exists".to_string(),
                    values: None,
                }]),
            },
            // Unknown operator: warning, contributes nothing.
            k8s::LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![k8s::LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "Near".to_string(),
                    values: None,
                }]),
            },
        ]),
    ));
    index.apply_cluster_role(cluster_role(
        "by-expression",
        "uid-e",
        vec![policy_rule(&[""], &["pods"], &["list"])],
        Some(label_map(&[("tier", "web")])),
        None,
    ));

    let snapshot = index.build_snapshot();
    let target = rbacgraph_controller_core::RoleId::new(RoleKind::ClusterRole, "", "target");
    let sources: Vec<&str> = snapshot.aggregated_role_sources[&target]
        .iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(sources, vec!["clusterrole:by-expression"]);
    assert!(snapshot
        .warnings
        .iter()
        .any(|w| w.contains("clusterrole/target has invalid aggregation selector")));
}

#[test]
fn unresolved_aggregation_is_a_known_gap() {
    let mut index = Index::default();
    synced(&mut index);
    index.apply_cluster_role(cluster_role(
        "pending-agg",
        "uid-p",
        Vec::new(),
        None,
        Some(vec![k8s::LabelSelector {
            match_labels: Some(label_map(&[("x", "y")])),
            match_expressions: None,
        }]),
    ));

    let snapshot = index.build_snapshot();
    assert!(snapshot
        .known_gaps
        .iter()
        .any(|gap| gap == "clusterrole/pending-agg has aggregationRule but resolved rules are empty"));
}

#[test]
fn unsynced_kinds_warn_but_do_not_fail() {
    let mut index = Index::default();
    index.mark_synced("roles");
    index.apply_role(k8s::Role {
        metadata: meta(Some("team"), "reader", "uid-r"),
        rules: Some(vec![policy_rule(&[""], &["pods"], &["get"])]),
    });

    let snapshot = index.build_snapshot();
    assert_eq!(snapshot.all_role_ids.len(), 1);
    assert!(snapshot
        .warnings
        .iter()
        .any(|w| w == "pods cache not synced; results may be incomplete"));
    assert!(!snapshot.warnings.iter().any(|w| w.starts_with("roles ")));
}

#[test]
fn workloads_are_keyed_by_uid() {
    let mut index = Index::default();
    synced(&mut index);
    index.apply_pod(k8s::Pod {
        metadata: meta(Some("team"), "pod-a", "uid-pod"),
        spec: None,
        status: None,
    });

    let deployment = k8s::Deployment {
        metadata: meta(Some("team"), "demo", "uid-deploy"),
        ..Default::default()
    };
    kubert::index::IndexNamespacedResource::apply(&mut index, deployment);

    // A workload without a UID is unreachable and never indexed.
    let uidless = k8s::Deployment {
        metadata: k8s::ObjectMeta {
            namespace: Some("team".to_string()),
            name: Some("no-uid".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    kubert::index::IndexNamespacedResource::apply(&mut index, uidless);

    let snapshot = index.build_snapshot();
    assert_eq!(snapshot.workloads_by_uid.len(), 1);
    let workload = &snapshot.workloads_by_uid["uid-deploy"];
    assert_eq!(workload.kind, "Deployment");
    assert_eq!(workload.api_version, "apps/v1");
}

#[test]
fn subjects_convert_by_kind() {
    let mut index = Index::default();
    synced(&mut index);
    index.apply_cluster_role_binding(k8s::ClusterRoleBinding {
        metadata: meta(None, "bind", "uid-b"),
        role_ref: k8s::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "admin".to_string(),
        },
        subjects: Some(vec![
            k8s::Subject {
                kind: "User".to_string(),
                name: "alice".to_string(),
                ..Default::default()
            },
            k8s::Subject {
                kind: "Group".to_string(),
                name: "auditors".to_string(),
                ..Default::default()
            },
            k8s::Subject {
                kind: "ServiceAccount".to_string(),
                name: "demo-sa".to_string(),
                namespace: Some("team".to_string()),
                ..Default::default()
            },
        ]),
    });

    let snapshot = index.build_snapshot();
    let bindings: Vec<_> = snapshot.bindings_by_role_ref.values().flatten().collect();
    assert_eq!(bindings.len(), 1);
    assert_eq!(
        bindings[0].subjects,
        vec![
            Subject::User {
                name: "alice".to_string()
            },
            Subject::Group {
                name: "auditors".to_string()
            },
            Subject::ServiceAccount {
                namespace: "team".to_string(),
                name: "demo-sa".to_string()
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rebuild_task_debounces_and_publishes() {
    let index = Index::shared();
    let (tx, rx) = watch::channel(None);
    let task = tokio::spawn(rebuilds(
        index.clone(),
        tx,
        Metrics::default(),
        Duration::from_millis(500),
        None,
    ));

    {
        let mut index = index.write();
        for kind in ALL_KINDS {
            index.mark_synced(kind);
        }
        index.apply_role(k8s::Role {
            metadata: meta(Some("team"), "reader", "uid-r"),
            rules: Some(vec![policy_rule(&[""], &["pods"], &["get"])]),
        });
    }

    // Within the debounce interval nothing is published yet.
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert!(rx.borrow().is_none());

    // After the interval elapses one snapshot appears, covering the burst.
    tokio::time::advance(Duration::from_millis(500)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let snapshot = rx.borrow().clone().expect("snapshot published");
    assert_eq!(snapshot.all_role_ids.len(), 1);

    task.abort();
}

#[test]
fn deletes_remove_records() {
    let mut index = Index::default();
    synced(&mut index);
    index.apply_role(k8s::Role {
        metadata: meta(Some("team"), "reader", "uid-r"),
        rules: Some(vec![policy_rule(&[""], &["pods"], &["get"])]),
    });
    index.delete_role("team".to_string(), "reader".to_string());

    let snapshot = index.build_snapshot();
    assert!(snapshot.all_role_ids.is_empty());
}
