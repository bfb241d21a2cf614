//! Volumes

use chrono::Utc;
use dboxed_types::ids::{EntityId, VolumeId, WorkspaceId};
use dboxed_types::models::Volume;
use dboxed_types::status::ObjectMeta;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::change_tracking::next_change_seq;
use crate::entity::{read_id, read_meta, Entity, Record};
use crate::error::{StorageError, StorageResult};
use crate::querier::{find_one, Filter};

impl Record for Volume {
    const TABLE: &'static str = "volumes";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        let fs_size: i64 = row.try_get("fs_size")?;
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            name: row.try_get("name")?,
            fs_size: u64::try_from(fs_size)
                .map_err(|_| StorageError::InvalidData(format!("negative fs_size {fs_size}")))?,
            fs_type: row.try_get("fs_type")?,
            meta: read_meta(row)?,
        })
    }
}

impl Entity for Volume {
    type Id = VolumeId;
    const KIND: &'static str = "volume";

    fn id(&self) -> VolumeId {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// Attributes of a volume to create
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub fs_size: u64,
    pub fs_type: String,
}

pub async fn create_volume(conn: &mut SqliteConnection, new: NewVolume) -> StorageResult<Volume> {
    let fs_size = i64::try_from(new.fs_size)
        .map_err(|_| StorageError::InvalidData(format!("fs_size {} too large", new.fs_size)))?;
    let seq = next_change_seq(conn).await?;
    let volume = Volume {
        id: VolumeId::generate(),
        workspace_id: new.workspace_id,
        name: new.name,
        fs_size: new.fs_size,
        fs_type: new.fs_type,
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    sqlx::query(
        r#"
        INSERT INTO volumes (id, workspace_id, name, fs_size, fs_type, created_at, change_seq)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(volume.id.to_db())
    .bind(volume.workspace_id.to_db())
    .bind(&volume.name)
    .bind(fs_size)
    .bind(&volume.fs_type)
    .bind(volume.meta.created_at)
    .bind(seq)
    .execute(&mut *conn)
    .await?;
    Ok(volume)
}

/// Live volume by name
pub async fn get_volume_by_name(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
) -> StorageResult<Option<Volume>> {
    let filter = Filter::new()
        .id("workspace_id", workspace_id)
        .eq("name", name)
        .live();
    find_one(conn, &filter).await
}
