//! RBAC graph indexer
//!
//! Watches the cluster resources the query engine reads — Roles,
//! ClusterRoles, RoleBindings, ClusterRoleBindings, Pods, and the workload
//! controllers (Deployments, ReplicaSets, StatefulSets, DaemonSets, Jobs,
//! CronJobs) — into per-kind raw caches. Watch events do no work beyond
//! updating the cache and signalling a change; a single rebuild task
//! debounces those signals, assembles a fresh immutable [`Snapshot`]
//! (records, inverted token indexes, resolved cluster-role aggregation), and
//! publishes it atomically into a watch slot. Readers holding the previous
//! snapshot are unaffected.
//!
//! ```ignore
//! [watches] -> [raw caches] -(debounce)-> [Snapshot] -> watch slot -> queries
//! ```
//!
//! A separate task refreshes the API discovery cache on a fixed cadence; a
//! refresh failure keeps the previous cache so downstream annotation
//! degrades rather than breaks.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bindings;
pub mod discovery;
mod index;
pub mod metrics;
mod pods;
mod roles;
#[cfg(test)]
mod tests;
mod workloads;

pub use self::index::{rebuilds, Index, SharedIndex};
pub use self::metrics::Metrics;

use rbacgraph_controller_api::Selector;
use rbacgraph_controller_core::{DiscoveryCache, SelectorError, Snapshot};
use std::sync::Arc;
use tokio::sync::watch;

/// Read handle used by the request path: the current snapshot and discovery
/// cache, each read once per query from its single-writer slot.
#[derive(Clone, Debug)]
pub struct Handle {
    snapshot_rx: watch::Receiver<Option<Arc<Snapshot>>>,
    discovery_rx: watch::Receiver<Option<Arc<DiscoveryCache>>>,
}

// === impl Handle ===

impl Handle {
    pub fn new(
        snapshot_rx: watch::Receiver<Option<Arc<Snapshot>>>,
        discovery_rx: watch::Receiver<Option<Arc<DiscoveryCache>>>,
    ) -> Self {
        Self {
            snapshot_rx,
            discovery_rx,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn discovery(&self) -> Option<Arc<DiscoveryCache>> {
        self.discovery_rx.borrow().clone()
    }

    /// True once the first snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.snapshot_rx.borrow().is_some()
    }

    /// Validates concrete selector values against discovery. Absent
    /// discovery degrades to accepting everything.
    pub fn validate_selector(&self, selector: &Selector) -> Result<(), SelectorError> {
        match self.discovery() {
            Some(discovery) => discovery.validate_selector(selector),
            None => Ok(()),
        }
    }
}
