//! # dboxed-controllers
//!
//! Reconcilers of the dboxed control plane:
//!
//! - [`networks`], [`boxes`], [`volumes`]: hold finalizers on resources and
//!   tear down what depends on them when they are deleted
//! - [`spec`]: converge volumes and boxes to declarative spec documents
//! - [`replica_set`]: keep load balancer and ingress proxy members at their
//!   declared count
//!
//! [`ControllerSet`] starts a [`ReconcileLoop`](dboxed_reconciler::ReconcileLoop)
//! for each of them.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod boxes;
mod finalizer;
pub mod networks;
pub mod replica_set;
pub mod set;
pub mod spec;
pub mod volumes;

#[cfg(test)]
pub(crate) mod testing;

pub use boxes::BoxReconciler;
pub use networks::NetworkReconciler;
pub use replica_set::{IngressProxyReconciler, LoadBalancerReconciler, ReplicaSetReconciler};
pub use set::{ControllerSet, RunningLoop, LOOP_NAMES};
pub use spec::{DirectoryFetcher, InMemoryFetcher, SourceFetcher, SpecReconciler};
pub use volumes::VolumeReconciler;
