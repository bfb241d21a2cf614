//! Strongly-typed identifiers for dboxed entities
//!
//! All IDs are UUID-based but wrapped in newtype structs for type safety.
//! The database stores the bare UUID; `Display` adds a short kind prefix for
//! logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Common behaviour of every entity identifier.
pub trait EntityId:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + Unpin + 'static
{
    /// Short prefix used when displaying the id.
    const PREFIX: &'static str;

    fn from_uuid(uuid: Uuid) -> Self;

    fn as_uuid(&self) -> &Uuid;

    /// Column representation of the id.
    fn to_db(&self) -> String {
        self.as_uuid().to_string()
    }
}

/// Error returned when parsing an id from text fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id '{value}'")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Parse an id from either its bare UUID form or its prefixed display form.
pub fn parse_id<I: EntityId>(value: &str) -> Result<I, IdParseError> {
    let raw = value
        .strip_prefix(I::PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(value);
    Uuid::parse_str(raw)
        .map(I::from_uuid)
        .map_err(|_| IdParseError {
            kind: I::PREFIX,
            value: value.to_string(),
        })
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl EntityId for $name {
            const PREFIX: &'static str = $prefix;

            fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_id(s)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a workspace
    WorkspaceId,
    "ws"
);

entity_id!(
    /// Unique identifier for a network
    NetworkId,
    "net"
);

entity_id!(
    /// Unique identifier for a box (sandbox)
    BoxId,
    "box"
);

entity_id!(
    /// Unique identifier for a volume
    VolumeId,
    "vol"
);

entity_id!(
    /// Unique identifier for a load balancer
    LoadBalancerId,
    "lb"
);

entity_id!(
    /// Unique identifier for an ingress proxy
    IngressProxyId,
    "ingress"
);

entity_id!(
    /// Unique identifier for a routing service entry
    ServiceId,
    "svc"
);

entity_id!(
    /// Unique identifier for a dboxed spec
    DboxedSpecId,
    "spec"
);

entity_id!(
    /// Unique identifier for a git spec
    GitSpecId,
    "gitspec"
);

entity_id!(
    /// Unique identifier for a spec mapping row
    SpecMappingId,
    "mapping"
);
