//! Decides whether a single policy rule satisfies a selector and, when it
//! does, emits the canonical rule references witnessing the access.

use crate::record::PolicyRule;
use rbacgraph_controller_api::{MatchMode, RuleRef, Selector, WildcardMode};

pub struct MatchInput<'a> {
    pub rule: &'a PolicyRule,
    pub selector: &'a Selector,
    pub mode: MatchMode,
    pub wildcard_mode: WildcardMode,
    pub source_uid: &'a str,
    pub rule_index: usize,
}

#[derive(Debug, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub rule_refs: Vec<RuleRef>,
}

type Cmp = fn(&str, &str) -> bool;

pub fn match_rule(input: &MatchInput<'_>) -> MatchResult {
    // Selectors naming api-groups/resources/resource-names run against the
    // rule's resource grants; non-resource URLs run against its URL grants.
    // When both classes are constrained, both must match.
    let resource_query = input.selector.has_resource_query();
    let non_resource_query = input.selector.has_non_resource_query();

    let (resource_refs, resource_matched) = match_resource_rule(input);
    let (non_resource_refs, non_resource_matched) = match_non_resource_rule(input);

    match (resource_query, non_resource_query) {
        (true, true) => {
            if resource_matched && non_resource_matched {
                let mut refs = resource_refs;
                refs.extend(non_resource_refs);
                MatchResult {
                    matched: true,
                    rule_refs: refs,
                }
            } else {
                MatchResult::default()
            }
        }
        (true, false) => matched_if(resource_matched, resource_refs),
        (false, true) => matched_if(non_resource_matched, non_resource_refs),
        (false, false) => {
            if resource_matched {
                matched_if(true, resource_refs)
            } else {
                matched_if(non_resource_matched, non_resource_refs)
            }
        }
    }
}

fn matched_if(matched: bool, rule_refs: Vec<RuleRef>) -> MatchResult {
    if matched {
        MatchResult {
            matched: true,
            rule_refs,
        }
    } else {
        MatchResult::default()
    }
}

fn match_resource_rule(input: &MatchInput<'_>) -> (Vec<RuleRef>, bool) {
    let rule = input.rule;
    if rule.resources.is_empty() {
        return (Vec::new(), false);
    }

    let exact = input.wildcard_mode == WildcardMode::Exact;
    let (group_cmp, resource_cmp, verb_cmp): (Cmp, Cmp, Cmp) = if exact {
        (exact_match_ci, exact_match_ci, exact_match_ci)
    } else {
        (exact_or_wildcard, resource_wildcard_match, exact_or_wildcard)
    };

    let selector = input.selector;
    let groups = match resolve_field(
        ensure_wildcard_for_mode(&selector.api_groups, exact),
        &rule.api_groups,
        &selector.api_groups,
        input.mode,
        group_cmp,
    ) {
        Some(groups) => groups,
        None => return (Vec::new(), false),
    };
    let resources = match resolve_field(
        ensure_wildcard_for_mode(&selector.resources, exact),
        &rule.resources,
        &selector.resources,
        input.mode,
        resource_cmp,
    ) {
        Some(resources) => resources,
        None => return (Vec::new(), false),
    };
    let verbs = match resolve_field(
        ensure_wildcard_for_mode(&selector.verbs, exact),
        &rule.verbs,
        &selector.verbs,
        input.mode,
        verb_cmp,
    ) {
        Some(verbs) => verbs,
        None => return (Vec::new(), false),
    };

    if !match_resource_names(&selector.resource_names, &rule.resource_names, input.mode) {
        return (Vec::new(), false);
    }

    // Echo the selector's resource-names on the ref only when the rule itself
    // restricts by name; an unrestricted rule grants all names and must not
    // look like a name-scoped grant.
    let ref_names: Vec<String> = if rule.resource_names.is_empty() {
        Vec::new()
    } else {
        selector.resource_names.clone()
    };

    let mut refs = Vec::with_capacity(groups.len() * resources.len() * verbs.len());
    for group in &groups {
        for full_resource in &resources {
            let (resource, subresource) = split_resource(full_resource);
            for verb in &verbs {
                refs.push(RuleRef {
                    api_group: group.clone(),
                    resource: resource.to_string(),
                    subresource: subresource.to_string(),
                    verb: verb.clone(),
                    resource_names: ref_names.clone(),
                    source_object_uid: input.source_uid.to_string(),
                    source_rule_index: Some(input.rule_index),
                    ..Default::default()
                });
            }
        }
    }

    (refs, true)
}

fn match_non_resource_rule(input: &MatchInput<'_>) -> (Vec<RuleRef>, bool) {
    let rule = input.rule;
    if rule.non_resource_urls.is_empty() {
        return (Vec::new(), false);
    }

    let exact = input.wildcard_mode == WildcardMode::Exact;
    let (url_cmp, verb_cmp): (Cmp, Cmp) = if exact {
        (non_resource_exact_match, exact_match_ci)
    } else {
        (non_resource_wildcard_match, exact_or_wildcard)
    };

    let selector = input.selector;
    let urls = match resolve_field(
        ensure_wildcard_for_mode(&selector.non_resource_urls, exact),
        &rule.non_resource_urls,
        &selector.non_resource_urls,
        input.mode,
        url_cmp,
    ) {
        Some(urls) => urls,
        None => return (Vec::new(), false),
    };
    let verbs = match resolve_field(
        ensure_wildcard_for_mode(&selector.verbs, exact),
        &rule.verbs,
        &selector.verbs,
        input.mode,
        verb_cmp,
    ) {
        Some(verbs) => verbs,
        None => return (Vec::new(), false),
    };

    let mut refs = Vec::with_capacity(urls.len() * verbs.len());
    for url in &urls {
        for verb in &verbs {
            refs.push(RuleRef {
                non_resource_urls: vec![url.clone()],
                verb: verb.clone(),
                source_object_uid: input.source_uid.to_string(),
                source_rule_index: Some(input.rule_index),
                ..Default::default()
            });
        }
    }

    (refs, true)
}

/// Resolves one selector field against the rule's allowed values.
///
/// `requested == None` means the field carries no constraint (exact mode with
/// an empty selector field): the rule's own values pass through. Otherwise
/// the requested values must match under `mode`; an empty selector field
/// (expanded to `["*"]`) also passes the rule's values through so that refs
/// name concrete grants rather than the wildcard.
fn resolve_field(
    requested: Option<Vec<String>>,
    rule_values: &[String],
    selector_values: &[String],
    mode: MatchMode,
    cmp: Cmp,
) -> Option<Vec<String>> {
    match requested {
        Some(requested) => {
            let matches = match_requested(&requested, rule_values, mode, cmp);
            if matches.is_empty() {
                return None;
            }
            if selector_values.is_empty() {
                Some(rule_values.to_vec())
            } else {
                Some(matches)
            }
        }
        None => Some(rule_values.to_vec()),
    }
}

fn match_requested(requested: &[String], allowed: &[String], mode: MatchMode, cmp: Cmp) -> Vec<String> {
    if allowed.is_empty() {
        return Vec::new();
    }

    let mut matches = Vec::with_capacity(requested.len());
    for req in requested {
        if allowed.iter().any(|allow| cmp(req, allow)) {
            matches.push(req.clone());
            continue;
        }
        if mode == MatchMode::All {
            return Vec::new();
        }
    }

    if mode == MatchMode::Any && matches.is_empty() {
        return Vec::new();
    }
    matches
}

fn match_resource_names(requested: &[String], allowed: &[String], mode: MatchMode) -> bool {
    if requested.is_empty() || allowed.is_empty() {
        return true;
    }
    match mode {
        MatchMode::All => requested.iter().all(|name| allowed.contains(name)),
        MatchMode::Any => requested.iter().any(|name| allowed.contains(name)),
    }
}

fn exact_match_ci(requested: &str, allowed: &str) -> bool {
    requested.trim().eq_ignore_ascii_case(allowed.trim())
}

fn non_resource_exact_match(requested: &str, allowed: &str) -> bool {
    requested.trim() == allowed.trim()
}

fn exact_or_wildcard(requested: &str, allowed: &str) -> bool {
    let requested = requested.trim().to_ascii_lowercase();
    let allowed = allowed.trim().to_ascii_lowercase();
    allowed == "*" || requested == "*" || requested == allowed
}

fn resource_wildcard_match(requested: &str, allowed: &str) -> bool {
    let requested = requested.trim().to_ascii_lowercase();
    let allowed = allowed.trim().to_ascii_lowercase();
    if allowed == "*" || requested == "*" || requested == allowed {
        return true;
    }
    // "pods/*" covers every subresource of pods.
    match allowed.strip_suffix("/*") {
        Some(prefix) => requested.starts_with(&format!("{}/", prefix)),
        None => false,
    }
}

fn non_resource_wildcard_match(requested: &str, allowed: &str) -> bool {
    let requested = requested.trim();
    let allowed = allowed.trim();
    if allowed == "*" || requested == "*" || requested == allowed {
        return true;
    }
    match allowed.strip_suffix('*') {
        Some(prefix) => requested.starts_with(prefix),
        None => false,
    }
}

fn split_resource(resource: &str) -> (&str, &str) {
    match resource.split_once('/') {
        Some((base, subresource)) => (base, subresource),
        None => (resource, ""),
    }
}

/// The default for an empty selector field. Expand mode treats the absent
/// field as the wildcard; exact mode treats it as no constraint at all.
fn ensure_wildcard_for_mode(values: &[String], exact: bool) -> Option<Vec<String>> {
    if values.is_empty() {
        if exact {
            None
        } else {
            Some(vec!["*".to_string()])
        }
    } else {
        Some(values.to_vec())
    }
}
