use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::UnknownVariant;
use crate::ids::{BoxId, NetworkId, VolumeId, WorkspaceId};
use crate::status::ObjectMeta;

/// What created a box and therefore who is responsible for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxType {
    Normal,
    LoadBalancer,
    IngressProxy,
}

impl BoxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::LoadBalancer => "load-balancer",
            Self::IngressProxy => "ingress-proxy",
        }
    }
}

impl FromStr for BoxType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "load-balancer" => Ok(Self::LoadBalancer),
            "ingress-proxy" => Ok(Self::IngressProxy),
            other => Err(UnknownVariant {
                kind: "box type",
                value: other.to_string(),
            }),
        }
    }
}

/// A compute sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub id: BoxId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub box_type: BoxType,
    pub network_id: Option<NetworkId>,
    pub meta: ObjectMeta,
}

/// Transport protocol of a port-forward rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(UnknownVariant {
                kind: "protocol",
                value: other.to_string(),
            }),
        }
    }
}

/// Host port range forwarded into a box; unique per (box, description).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortForward {
    pub box_id: BoxId,
    pub description: String,
    pub protocol: Protocol,
    pub host_port_first: u16,
    pub host_port_last: u16,
    pub sandbox_port: u16,
}

/// Compose project deployed into a box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProject {
    pub box_id: BoxId,
    pub name: String,
    pub content: String,
}

/// Volume mounted into a box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub box_id: BoxId,
    pub volume_id: VolumeId,
    pub root_uid: u32,
    pub root_gid: u32,
    pub root_mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_type_parse() {
        for ty in [BoxType::Normal, BoxType::LoadBalancer, BoxType::IngressProxy] {
            assert_eq!(ty.as_str().parse::<BoxType>().unwrap(), ty);
        }
        assert!("vm".parse::<BoxType>().is_err());
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert!("sctp".parse::<Protocol>().is_err());
    }
}
