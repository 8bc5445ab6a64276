use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use rbacgraph_controller_api::Selector;
use thiserror::Error;

/// The api-groups, resources, and per-(group, resource) verbs the cluster
/// advertises. Built at startup and refreshed periodically; consumers must
/// tolerate its absence (no phantom detection, no wildcard expansion).
#[derive(Clone, Debug)]
pub struct DiscoveryCache {
    /// Valid api-group names; the core group is the empty string.
    pub groups: HashSet<String>,

    /// Api-group → resource names, including subresources ("pods/exec").
    pub resources_by_group: HashMap<String, HashSet<String>>,

    /// Api-group → resource → sorted, lowercased verbs.
    pub verbs_by_group_resource: HashMap<String, HashMap<String, Vec<String>>>,

    pub all_resources: HashSet<String>,
    pub all_verbs: HashSet<String>,

    pub fetched_at: DateTime<Utc>,
}

/// A selector referenced values the cluster does not serve.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unknown apiGroups: {0:?}; use 'kubectl api-resources' to list available groups")]
    UnknownApiGroups(Vec<String>),

    #[error("unknown resources: {0:?}; use 'kubectl api-resources' to list available resources")]
    UnknownResources(Vec<String>),

    #[error("unknown verbs: {0:?}; use 'kubectl api-resources -o wide' to list available verbs")]
    UnknownVerbs(Vec<String>),
}

// === impl DiscoveryCache ===

impl DiscoveryCache {
    pub fn empty() -> Self {
        Self {
            groups: HashSet::default(),
            resources_by_group: HashMap::default(),
            verbs_by_group_resource: HashMap::default(),
            all_resources: HashSet::default(),
            all_verbs: HashSet::default(),
            fetched_at: Utc::now(),
        }
    }

    /// Records one (group, resource, verbs) triple. Verbs are lowercased;
    /// `finish` establishes their sort order.
    pub fn insert_resource(&mut self, group: &str, resource: &str, verbs: &[String]) {
        self.groups.insert(group.to_string());
        self.resources_by_group
            .entry(group.to_string())
            .or_default()
            .insert(resource.to_string());
        self.all_resources.insert(resource.to_string());

        let verbs: Vec<String> = verbs.iter().map(|v| v.to_ascii_lowercase()).collect();
        for verb in &verbs {
            self.all_verbs.insert(verb.clone());
        }
        self.verbs_by_group_resource
            .entry(group.to_string())
            .or_default()
            .insert(resource.to_string(), verbs);
    }

    pub fn finish(&mut self) {
        for resources in self.verbs_by_group_resource.values_mut() {
            for verbs in resources.values_mut() {
                verbs.sort();
            }
        }
    }

    /// Checks every concrete (non-wildcard) selector value against the
    /// cluster's advertised surface. Wildcards and empty fields bypass
    /// validation.
    pub fn validate_selector(&self, selector: &Selector) -> Result<(), SelectorError> {
        self.validate_api_groups(&selector.api_groups)?;
        self.validate_resources(&selector.api_groups, &selector.resources)?;
        self.validate_verbs(&selector.verbs)?;
        Ok(())
    }

    fn validate_api_groups(&self, api_groups: &[String]) -> Result<(), SelectorError> {
        if api_groups.is_empty() || contains_wildcard(api_groups) {
            return Ok(());
        }
        let unknown: Vec<String> = api_groups
            .iter()
            .filter(|g| !self.groups.contains(*g))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SelectorError::UnknownApiGroups(unknown))
        }
    }

    fn validate_resources(
        &self,
        api_groups: &[String],
        resources: &[String],
    ) -> Result<(), SelectorError> {
        if resources.is_empty() || contains_wildcard(resources) {
            return Ok(());
        }

        // When apiGroups are constrained, each resource must exist in at
        // least one of the named groups; otherwise the flat set decides.
        let constrained = !api_groups.is_empty() && !contains_wildcard(api_groups);

        let unknown: Vec<String> = resources
            .iter()
            .filter(|r| {
                if constrained {
                    !self.resource_exists_in_groups(api_groups, r)
                } else {
                    !self.all_resources.contains(*r)
                }
            })
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SelectorError::UnknownResources(unknown))
        }
    }

    fn resource_exists_in_groups(&self, api_groups: &[String], resource: &str) -> bool {
        api_groups.iter().any(|g| {
            self.resources_by_group
                .get(g)
                .map(|resources| resources.contains(resource))
                .unwrap_or(false)
        })
    }

    fn validate_verbs(&self, verbs: &[String]) -> Result<(), SelectorError> {
        if verbs.is_empty() || contains_wildcard(verbs) {
            return Ok(());
        }
        let unknown: Vec<String> = verbs
            .iter()
            .filter(|v| !self.all_verbs.contains(&v.to_ascii_lowercase()))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SelectorError::UnknownVerbs(unknown))
        }
    }
}

fn contains_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}
