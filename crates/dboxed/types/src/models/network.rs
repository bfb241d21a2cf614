use serde::{Deserialize, Serialize};

use crate::ids::{NetworkId, WorkspaceId};
use crate::status::ObjectMeta;

/// Virtual network that boxes and replica sets attach to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub meta: ObjectMeta,
}
