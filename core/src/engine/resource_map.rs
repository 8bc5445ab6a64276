use super::QueryContext;
use crate::record::RoleId;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use rbacgraph_controller_api::{ResourceMapRow, RuleRef};

/// Rows are keyed structurally so "pods"/"exec" and "pods/exec" cannot
/// collide with each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(super) struct ResourceRowKey {
    api_group: String,
    resource: String,
    subresource: String,
    verb: String,
    non_resource_joined: String,
}

pub(super) struct ResourceAccumulator {
    api_group: String,
    resource: String,
    verb: String,
    roles: HashSet<RoleId>,
    bindings: HashSet<String>,
    subjects: HashSet<String>,
}

impl QueryContext<'_> {
    /// Counts the distinct roles/bindings/subjects reaching each access
    /// tuple. The three counts are independent: a binding with no subjects
    /// still increments the binding count.
    pub(super) fn accumulate_resource_rows(
        &mut self,
        refs: &[RuleRef],
        role_id: &RoleId,
        binding_id: Option<&str>,
        subject_id: Option<&str>,
    ) {
        for rule_ref in refs {
            let non_resource_joined = if rule_ref.non_resource_urls.is_empty() {
                String::new()
            } else {
                rule_ref.non_resource_urls.join(",")
            };
            let key = ResourceRowKey {
                api_group: rule_ref.api_group.clone(),
                resource: rule_ref.resource.clone(),
                subresource: rule_ref.subresource.clone(),
                verb: rule_ref.verb.clone(),
                non_resource_joined: non_resource_joined.clone(),
            };

            let acc = self.resource_rows.entry(key).or_insert_with(|| {
                let resource = if !non_resource_joined.is_empty() {
                    non_resource_joined
                } else if rule_ref.subresource.is_empty() {
                    rule_ref.resource.clone()
                } else {
                    format!("{}/{}", rule_ref.resource, rule_ref.subresource)
                };
                ResourceAccumulator {
                    api_group: rule_ref.api_group.clone(),
                    resource,
                    verb: rule_ref.verb.clone(),
                    roles: HashSet::default(),
                    bindings: HashSet::default(),
                    subjects: HashSet::default(),
                }
            });
            acc.roles.insert(role_id.clone());
            if let Some(binding_id) = binding_id {
                acc.bindings.insert(binding_id.to_string());
            }
            if let Some(subject_id) = subject_id {
                acc.subjects.insert(subject_id.to_string());
            }
        }
    }
}

pub(super) fn collapse_resource_rows(
    rows: HashMap<ResourceRowKey, ResourceAccumulator>,
) -> Vec<ResourceMapRow> {
    let mut out: Vec<ResourceMapRow> = rows
        .into_values()
        .map(|acc| ResourceMapRow {
            api_group: acc.api_group,
            resource: acc.resource,
            verb: acc.verb,
            role_count: acc.roles.len(),
            binding_count: acc.bindings.len(),
            subject_count: acc.subjects.len(),
        })
        .collect();
    out.sort_by(|a, b| {
        (&a.api_group, &a.resource, &a.verb).cmp(&(&b.api_group, &b.resource, &b.verb))
    });
    out
}
