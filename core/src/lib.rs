//! Core domain model and query pipeline for the RBAC graph controller.
//!
//! Everything in this crate is pure computation over immutable values: the
//! [`Snapshot`] (records plus derived inverted indexes), the rule
//! [`matcher`], the [`engine`] that assembles the answer graph, and the
//! caller-[`scope`] evaluation with its snapshot [`filter`]. No I/O happens
//! here; the `k8s-index` crate feeds snapshots in and the runtime crate
//! drives queries against them.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod discovery;
pub mod engine;
pub mod filter;
pub mod matcher;
mod record;
pub mod scope;
mod snapshot;

pub use self::discovery::{DiscoveryCache, SelectorError};
pub use self::record::{
    normalize_service_account_name, BindingKind, BindingRecord, OwnerRef, PodPhase, PodRecord,
    PolicyRule, RoleId, RoleKind, RoleRecord, RoleRefKey, ServiceAccountKey, Subject,
    WorkloadRecord, DEFAULT_SERVICE_ACCOUNT,
};
pub use self::scope::{AccessScope, Caller};
pub use self::snapshot::Snapshot;
