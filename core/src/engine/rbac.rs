use super::graph::{
    binding_node_id, binding_type, edge_id, subject_node_id, subject_type, EXPLAIN_AGGREGATES,
    EXPLAIN_GRANTS, EXPLAIN_SUBJECTS,
};
use super::{allow_namespace, filter_bindings, QueryContext};
use crate::discovery::DiscoveryCache;
use crate::matcher::{self, MatchInput};
use crate::record::{RoleId, RoleRecord};
use rbacgraph_controller_api::{
    GraphEdge, GraphEdgeType, GraphNode, RoleGraphReviewSpec, RuleRef,
};

const MAX_EXPANDED_REFS_PER_PARENT: usize = 2000;

impl QueryContext<'_> {
    pub(super) fn build_rbac_graph(&mut self, role_ids: &[RoleId]) {
        for role_id in role_ids {
            let role = match self.snapshot.roles_by_id.get(role_id) {
                Some(role) => role.clone(),
                None => continue,
            };
            if !allow_namespace(self.namespace_filter.as_ref(), &role.namespace, false) {
                continue;
            }

            let mut matches = match_role(&role, &self.spec);
            if self.discovery.is_some() {
                self.annotate_phantom_refs(&mut matches);
                if self.spec.filter_phantom_apis {
                    matches.retain(|rule_ref| !rule_ref.phantom);
                }
                self.expand_wildcard_refs(&mut matches);
                self.annotate_unsupported_verbs(&mut matches);
            }
            if matches.is_empty() {
                continue;
            }

            let bindings = self
                .snapshot
                .bindings_by_role_ref
                .get(&role.role_ref_key())
                .map(|bindings| bindings.as_slice())
                .unwrap_or_default();
            let bindings =
                filter_bindings(self.namespace_filter.as_ref(), self.namespace_strict, bindings);
            // In strict scope a cluster-scoped role survives only through a
            // binding that reaches the requested namespaces.
            if self.namespace_strict && role.namespace.is_empty() && bindings.is_empty() {
                continue;
            }

            let sources = self
                .snapshot
                .aggregated_role_sources
                .get(role_id)
                .cloned()
                .unwrap_or_default();
            let role_node_id = self.upsert_role_node(&role, &sources, &matches);
            self.role_seen.insert(role_id.clone());

            for source_id in &sources {
                let source_role = match self.snapshot.roles_by_id.get(source_id) {
                    Some(source_role) => source_role.clone(),
                    None => continue,
                };
                let source_sources = self
                    .snapshot
                    .aggregated_role_sources
                    .get(source_id)
                    .cloned()
                    .unwrap_or_default();
                let source_node_id = self.upsert_role_node(&source_role, &source_sources, &[]);
                self.append_edge_if_missing(GraphEdge {
                    id: edge_id(&source_node_id, &role_node_id, GraphEdgeType::Aggregates),
                    from: source_node_id,
                    to: role_node_id.clone(),
                    edge_type: GraphEdgeType::Aggregates,
                    explain: EXPLAIN_AGGREGATES.to_string(),
                    ..Default::default()
                });
            }

            if bindings.is_empty() {
                self.accumulate_resource_rows(&matches, role_id, None, None);
                continue;
            }

            for binding in &bindings {
                let binding_id = binding_node_id(binding);
                self.add_node_if_missing(GraphNode {
                    id: binding_id.clone(),
                    node_type: binding_type(binding),
                    name: binding.name.clone(),
                    namespace: binding.namespace.clone(),
                    ..Default::default()
                });
                self.binding_seen.insert(binding_id.clone());

                self.append_edge_if_missing(GraphEdge {
                    id: edge_id(&role_node_id, &binding_id, GraphEdgeType::Grants),
                    from: role_node_id.clone(),
                    to: binding_id.clone(),
                    edge_type: GraphEdgeType::Grants,
                    rule_refs: matches.clone(),
                    explain: EXPLAIN_GRANTS.to_string(),
                });

                if binding.subjects.is_empty() {
                    self.accumulate_resource_rows(&matches, role_id, Some(&binding_id), None);
                    continue;
                }

                for subject in &binding.subjects {
                    let subject_id = subject_node_id(subject);
                    self.add_node_if_missing(GraphNode {
                        id: subject_id.clone(),
                        node_type: subject_type(subject),
                        name: subject.name().to_string(),
                        namespace: subject.namespace().to_string(),
                        ..Default::default()
                    });
                    self.subject_seen.insert(subject_id.clone());
                    self.track_service_account_subject(&subject_id, subject, &binding.namespace);

                    self.append_edge_if_missing(GraphEdge {
                        id: edge_id(&binding_id, &subject_id, GraphEdgeType::Subjects),
                        from: binding_id.clone(),
                        to: subject_id.clone(),
                        edge_type: GraphEdgeType::Subjects,
                        explain: EXPLAIN_SUBJECTS.to_string(),
                        ..Default::default()
                    });

                    self.accumulate_resource_rows(
                        &matches,
                        role_id,
                        Some(&binding_id),
                        Some(&subject_id),
                    );
                }
            }
        }
    }

    fn annotate_phantom_refs(&mut self, refs: &mut [RuleRef]) {
        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => return,
        };
        for rule_ref in refs.iter_mut() {
            // Non-resource refs have no api-group to validate; wildcards can
            // always match something.
            if rule_ref.api_group.is_empty()
                && rule_ref.resource.is_empty()
                && !rule_ref.non_resource_urls.is_empty()
            {
                continue;
            }
            if rule_ref.api_group == "*" || rule_ref.resource == "*" {
                continue;
            }

            let group_resources = match discovery.resources_by_group.get(&rule_ref.api_group) {
                Some(group_resources) => group_resources,
                None => {
                    rule_ref.phantom = true;
                    let warning = format!(
                        "API group {:?} referenced in role rules is not installed in the cluster",
                        rule_ref.api_group
                    );
                    self.add_warning(warning);
                    continue;
                }
            };

            // Look up the full "resource/subresource" form first; fall back
            // to the base resource before declaring the ref phantom.
            let lookup = if !rule_ref.subresource.is_empty() && !rule_ref.resource.contains('/') {
                format!("{}/{}", rule_ref.resource, rule_ref.subresource)
            } else {
                rule_ref.resource.clone()
            };
            if lookup.is_empty() {
                continue;
            }
            if !group_resources.contains(&lookup) {
                let base = rule_ref
                    .resource
                    .split('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if !group_resources.contains(&base) {
                    rule_ref.phantom = true;
                    let warning = format!(
                        "resource {:?} in API group {:?} is not registered in the cluster",
                        lookup, rule_ref.api_group
                    );
                    self.add_warning(warning);
                }
            }
        }
    }

    fn expand_wildcard_refs(&mut self, refs: &mut [RuleRef]) {
        if self.discovery.is_none() {
            return;
        }
        for rule_ref in refs.iter_mut() {
            if rule_ref.api_group != "*" && rule_ref.resource != "*" && rule_ref.verb != "*" {
                continue;
            }
            if rule_ref.api_group.is_empty()
                && rule_ref.resource.is_empty()
                && !rule_ref.non_resource_urls.is_empty()
            {
                continue;
            }

            let mut expanded = self.resolve_wildcard_ref(rule_ref);
            if expanded.len() > MAX_EXPANDED_REFS_PER_PARENT {
                expanded.truncate(MAX_EXPANDED_REFS_PER_PARENT);
                let warning = format!(
                    "wildcard expansion for {}/{}/{} truncated at {} entries",
                    rule_ref.api_group,
                    rule_ref.resource,
                    rule_ref.verb,
                    MAX_EXPANDED_REFS_PER_PARENT
                );
                self.add_warning(warning);
            }
            if !expanded.is_empty() {
                rule_ref.expanded_refs = expanded;
            }
        }
    }

    fn resolve_wildcard_ref(&self, rule_ref: &RuleRef) -> Vec<RuleRef> {
        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => return Vec::new(),
        };

        let mut result = Vec::new();
        for group in resolve_groups(discovery, &rule_ref.api_group) {
            for resource in resolve_resources(discovery, &group, &rule_ref.resource) {
                // Verb support is checked against the actual subresource, not
                // its parent.
                let full_resource = if rule_ref.subresource.is_empty() {
                    resource.clone()
                } else {
                    format!("{}/{}", resource, rule_ref.subresource)
                };
                for verb in resolve_verbs(discovery, &group, &full_resource, &rule_ref.verb) {
                    result.push(RuleRef {
                        api_group: group.clone(),
                        resource: resource.clone(),
                        subresource: rule_ref.subresource.clone(),
                        verb,
                        resource_names: rule_ref.resource_names.clone(),
                        ..Default::default()
                    });
                    if result.len() > MAX_EXPANDED_REFS_PER_PARENT {
                        return result;
                    }
                }
            }
        }
        result
    }

    fn annotate_unsupported_verbs(&mut self, refs: &mut [RuleRef]) {
        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => return,
        };
        for rule_ref in refs.iter_mut() {
            if rule_ref.verb == "*" || rule_ref.verb.is_empty() {
                continue;
            }
            let resource = if rule_ref.subresource.is_empty() {
                rule_ref.resource.clone()
            } else {
                format!("{}/{}", rule_ref.resource, rule_ref.subresource)
            };
            let groups = if rule_ref.api_group == "*" {
                resolve_groups(discovery, "*")
            } else {
                vec![rule_ref.api_group.clone()]
            };

            let mut supported = false;
            let mut resource_found = false;
            for group in &groups {
                let group_verbs = match discovery.verbs_by_group_resource.get(group) {
                    Some(group_verbs) => group_verbs,
                    None => continue,
                };
                let verbs = match group_verbs.get(&resource) {
                    Some(verbs) => verbs,
                    None => continue,
                };
                resource_found = true;
                if verbs.iter().any(|v| v.eq_ignore_ascii_case(&rule_ref.verb)) {
                    supported = true;
                    break;
                }
            }
            // Only flagged when discovery knows the resource but no group
            // supports the verb on it.
            rule_ref.unsupported_verb = resource_found && !supported;
        }
    }
}

pub(super) fn match_role(role: &RoleRecord, spec: &RoleGraphReviewSpec) -> Vec<RuleRef> {
    let mut refs = Vec::new();
    for (idx, rule) in role.rules.iter().enumerate() {
        let result = matcher::match_rule(&MatchInput {
            rule,
            selector: &spec.selector,
            mode: spec.match_mode,
            wildcard_mode: spec.wildcard_mode,
            source_uid: &role.uid,
            rule_index: idx,
        });
        if result.matched {
            refs.extend(result.rule_refs);
        }
    }
    if !spec.include_rule_metadata {
        for rule_ref in &mut refs {
            rule_ref.source_object_uid.clear();
            rule_ref.source_rule_index = None;
        }
    }
    refs
}

fn resolve_groups(discovery: &DiscoveryCache, api_group: &str) -> Vec<String> {
    if api_group != "*" {
        return vec![api_group.to_string()];
    }
    let mut groups: Vec<String> = discovery.resources_by_group.keys().cloned().collect();
    groups.sort();
    groups
}

fn resolve_resources(discovery: &DiscoveryCache, group: &str, resource: &str) -> Vec<String> {
    if resource != "*" {
        return vec![resource.to_string()];
    }
    let group_resources = match discovery.resources_by_group.get(group) {
        Some(group_resources) if !group_resources.is_empty() => group_resources,
        _ => return Vec::new(),
    };
    let mut resources: Vec<String> = group_resources.iter().cloned().collect();
    resources.sort();
    resources
}

fn resolve_verbs(discovery: &DiscoveryCache, group: &str, resource: &str, verb: &str) -> Vec<String> {
    let group_verbs = discovery.verbs_by_group_resource.get(group);

    if verb != "*" {
        let group_verbs = match group_verbs {
            Some(group_verbs) => group_verbs,
            // Group not in discovery: pass the verb through untouched.
            None => return vec![verb.to_string()],
        };
        return match group_verbs.get(resource) {
            Some(supported) if supported.iter().any(|v| v.eq_ignore_ascii_case(verb)) => {
                vec![verb.to_string()]
            }
            _ => Vec::new(),
        };
    }

    match group_verbs {
        None => {
            // Group unknown: fall back to every verb the cluster advertises.
            let mut verbs: Vec<String> = discovery.all_verbs.iter().cloned().collect();
            verbs.sort();
            verbs
        }
        // Per-resource verb lists are sorted at cache-build time.
        Some(group_verbs) => group_verbs.get(resource).cloned().unwrap_or_default(),
    }
}
