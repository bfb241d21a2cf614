//! Entity models persisted by the store

mod boxes;
mod network;
mod replica_set;
mod spec;
mod volume;
mod workspace;

pub use boxes::{BoxRecord, BoxType, ComposeProject, PortForward, Protocol, VolumeAttachment};
pub use network::Network;
pub use replica_set::{
    IngressProxy, LoadBalancer, ReplicaMember, ReplicaSetRecord, RoutingService,
};
pub use spec::{DboxedSpec, GitSpec, MappedObjectType, SpecMapping, SpecSourceKind};
pub use volume::Volume;
pub use workspace::Workspace;

/// Error raised when a stored enum column holds an unknown value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
