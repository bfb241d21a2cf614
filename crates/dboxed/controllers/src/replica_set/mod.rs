//! Replica-set reconciliation for load balancers and ingress proxies
//!
//! Both owner kinds keep `replicas` member boxes on their network. Members
//! carry the owner's public ports as port forwards and the routing
//! configuration rendered from the owner's services as a compose project.

pub mod config;
pub mod kind;
mod reconciler;

pub use kind::{IngressProxyKind, LoadBalancerKind, ReplicaSetKind};
pub use reconciler::{member_name, ReplicaSetReconciler};

/// Reconciler for load balancers
pub type LoadBalancerReconciler = ReplicaSetReconciler<LoadBalancerKind>;
/// Reconciler for ingress proxies
pub type IngressProxyReconciler = ReplicaSetReconciler<IngressProxyKind>;
