//! Replica-set owner kinds

use dboxed_store::ReplicaSetId;
use dboxed_types::ids::{IngressProxyId, LoadBalancerId};
use dboxed_types::models::BoxType;

/// Constants distinguishing load balancers from ingress proxies
pub trait ReplicaSetKind: Send + Sync + 'static {
    type Id: ReplicaSetId;

    /// Type of the member boxes
    const BOX_TYPE: BoxType;
    /// Member boxes are named `<prefix>-<owner>-<ordinal>`
    const NAME_PREFIX: &'static str;
    /// Compose project carrying the rendered routing configuration
    const CONFIG_PROJECT: &'static str;
    const FINALIZER: &'static str;
}

pub struct LoadBalancerKind;

impl ReplicaSetKind for LoadBalancerKind {
    type Id = LoadBalancerId;

    const BOX_TYPE: BoxType = BoxType::LoadBalancer;
    const NAME_PREFIX: &'static str = "lb";
    const CONFIG_PROJECT: &'static str = "dboxed-load-balancer";
    const FINALIZER: &'static str = "dboxed-load-balancer-members";
}

pub struct IngressProxyKind;

impl ReplicaSetKind for IngressProxyKind {
    type Id = IngressProxyId;

    const BOX_TYPE: BoxType = BoxType::IngressProxy;
    const NAME_PREFIX: &'static str = "ingress";
    const CONFIG_PROJECT: &'static str = "dboxed-ingress-proxy";
    const FINALIZER: &'static str = "dboxed-ingress-proxy-members";
}
