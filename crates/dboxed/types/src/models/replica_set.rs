use serde::{Deserialize, Serialize};

use crate::ids::{BoxId, IngressProxyId, LoadBalancerId, NetworkId, ServiceId, WorkspaceId};
use crate::status::ObjectMeta;

/// Owner of a set of identical member boxes.
///
/// Load balancers and ingress proxies share this shape and differ only in
/// their id type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetRecord<I> {
    pub id: I,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub network_id: NetworkId,
    pub replicas: u32,
    pub http_port: u16,
    pub https_port: u16,
    pub meta: ObjectMeta,
}

pub type LoadBalancer = ReplicaSetRecord<LoadBalancerId>;
pub type IngressProxy = ReplicaSetRecord<IngressProxyId>;

/// Membership of a box in a replica set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMember<I> {
    pub owner_id: I,
    pub box_id: BoxId,
    pub ordinal: u32,
}

/// Routing entry rendered into the configuration of every member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingService<I> {
    pub id: ServiceId,
    pub owner_id: I,
    /// Box traffic is routed to, if the entry targets one
    pub box_id: Option<BoxId>,
    pub description: String,
    pub hostname: String,
    pub path_prefix: String,
    pub port: u16,
}
