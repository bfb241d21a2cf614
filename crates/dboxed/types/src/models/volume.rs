use serde::{Deserialize, Serialize};

use crate::ids::{VolumeId, WorkspaceId};
use crate::status::ObjectMeta;

/// Persistent volume. Size and filesystem type are immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub fs_size: u64,
    pub fs_type: String,
    pub meta: ObjectMeta,
}
