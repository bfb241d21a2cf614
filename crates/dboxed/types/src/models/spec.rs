use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;
use crate::ids::{DboxedSpecId, GitSpecId, SpecMappingId, WorkspaceId};
use crate::status::ObjectMeta;

/// Spec document hosted at a git location, owned by one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DboxedSpec {
    pub id: DboxedSpecId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub git_url: String,
    pub git_ref: String,
    pub spec_file: String,
    pub meta: ObjectMeta,
}

/// Spec document addressed by repository; the mapping scope is the
/// repository key rather than the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSpec {
    pub id: GitSpecId,
    pub workspace_id: WorkspaceId,
    pub repository_url: String,
    pub git_ref: String,
    pub spec_file: String,
    pub meta: ObjectMeta,
}

/// Which kind of spec source owns a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecSourceKind {
    DboxedSpec,
    GitSpec,
}

impl SpecSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DboxedSpec => "dboxed-spec",
            Self::GitSpec => "git-spec",
        }
    }
}

impl FromStr for SpecSourceKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dboxed-spec" => Ok(Self::DboxedSpec),
            "git-spec" => Ok(Self::GitSpec),
            other => Err(UnknownVariant {
                kind: "spec source kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of object a spec mapping points at.
///
/// Ordering is creation order: volumes before the boxes that mount them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappedObjectType {
    Volume,
    Box,
}

impl MappedObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Box => "box",
        }
    }
}

impl FromStr for MappedObjectType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume" => Ok(Self::Volume),
            "box" => Ok(Self::Box),
            other => Err(UnknownVariant {
                kind: "mapped object type",
                value: other.to_string(),
            }),
        }
    }
}

/// Link between a logical name in a spec document and the object it
/// materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMapping {
    pub id: SpecMappingId,
    pub workspace_id: WorkspaceId,
    pub source_kind: SpecSourceKind,
    pub source_key: String,
    pub object_type: MappedObjectType,
    pub name: String,
    pub object_id: Uuid,
    pub recreate_key: String,
    pub fragment: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
