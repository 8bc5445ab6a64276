//! Wire types for the `RoleGraphReview` aggregated API.
//!
//! A `RoleGraphReview` is a create-only sub-resource: the caller POSTs an
//! object carrying a `spec` (selector + options) and receives the same object
//! back with `status` populated (counts, warnings, the role graph, and the
//! resource map).

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod graph;
mod review;

pub use self::graph::{
    Graph, GraphEdge, GraphEdgeType, GraphNode, GraphNodeType, ResourceMapRow,
    RoleGraphReviewStatus, RuleRef,
};
pub use self::review::{
    MatchMode, NamespaceScope, PodPhaseMode, RoleGraphReview, RoleGraphReviewSpec, Selector,
    WildcardMode, DEFAULT_MAX_PODS_PER_SUBJECT, DEFAULT_MAX_WORKLOADS_PER_POD,
};

pub const GROUP: &str = "rbacgraph.io";
pub const VERSION: &str = "v1alpha1";
pub const API_VERSION: &str = "rbacgraph.io/v1alpha1";
pub const KIND: &str = "RoleGraphReview";
pub const SINGULAR: &str = "rolegraphreview";
pub const PLURAL: &str = "rolegraphreviews";

pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}

pub(crate) fn is_zero(v: &usize) -> bool {
    *v == 0
}
