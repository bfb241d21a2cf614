//! Boxes and their child rows: port forwards, compose projects and volume
//! attachments.
//!
//! Child rows belong to the box; changing any of them bumps the box so its
//! runtime picks the change up.

use chrono::Utc;
use dboxed_types::ids::{BoxId, EntityId, NetworkId, VolumeId, WorkspaceId};
use dboxed_types::models::{
    BoxRecord, BoxType, ComposeProject, Network, PortForward, Volume, VolumeAttachment,
};
use dboxed_types::status::ObjectMeta;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::change_tracking::{bump, next_change_seq};
use crate::entity::{read_enum, read_id, read_meta, read_opt_id, Entity, Record};
use crate::error::{StorageError, StorageResult};
use crate::querier::{delete_where, find_all, find_one, get_by_id, Filter};

impl Record for BoxRecord {
    const TABLE: &'static str = "boxes";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            name: row.try_get("name")?,
            box_type: read_enum(row, "box_type")?,
            network_id: read_opt_id(row, "network_id")?,
            meta: read_meta(row)?,
        })
    }
}

impl Entity for BoxRecord {
    type Id = BoxId;
    const KIND: &'static str = "box";

    fn id(&self) -> BoxId {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

impl Record for PortForward {
    const TABLE: &'static str = "box_port_forwards";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            box_id: read_id(row, "box_id")?,
            description: row.try_get("description")?,
            protocol: read_enum(row, "protocol")?,
            host_port_first: row.try_get("host_port_first")?,
            host_port_last: row.try_get("host_port_last")?,
            sandbox_port: row.try_get("sandbox_port")?,
        })
    }
}

impl Record for ComposeProject {
    const TABLE: &'static str = "box_compose_projects";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            box_id: read_id(row, "box_id")?,
            name: row.try_get("name")?,
            content: row.try_get("content")?,
        })
    }
}

impl Record for VolumeAttachment {
    const TABLE: &'static str = "box_volume_attachments";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            box_id: read_id(row, "box_id")?,
            volume_id: read_id(row, "volume_id")?,
            root_uid: row.try_get("root_uid")?,
            root_gid: row.try_get("root_gid")?,
            root_mode: row.try_get("root_mode")?,
        })
    }
}

/// Attributes of a box to create
#[derive(Debug, Clone)]
pub struct NewBox {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub box_type: BoxType,
    pub network_id: Option<NetworkId>,
}

pub async fn create_box(conn: &mut SqliteConnection, new: NewBox) -> StorageResult<BoxRecord> {
    if let Some(network_id) = new.network_id {
        let network = get_by_id::<Network>(conn, network_id)
            .await?
            .ok_or_else(|| StorageError::not_found(network_id))?;
        if network.meta.is_deleted() {
            return Err(StorageError::conflict(format!(
                "network {} is being deleted",
                network.name
            )));
        }
    }

    let seq = next_change_seq(conn).await?;
    let record = BoxRecord {
        id: BoxId::generate(),
        workspace_id: new.workspace_id,
        name: new.name,
        box_type: new.box_type,
        network_id: new.network_id,
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    sqlx::query(
        r#"
        INSERT INTO boxes (id, workspace_id, name, box_type, network_id, created_at, change_seq)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_db())
    .bind(record.workspace_id.to_db())
    .bind(&record.name)
    .bind(record.box_type.as_str())
    .bind(record.network_id.map(|id| id.to_db()))
    .bind(record.meta.created_at)
    .bind(seq)
    .execute(&mut *conn)
    .await?;
    Ok(record)
}

/// Live box by name
pub async fn get_box_by_name(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
) -> StorageResult<Option<BoxRecord>> {
    let filter = Filter::new()
        .id("workspace_id", workspace_id)
        .eq("name", name)
        .live();
    find_one(conn, &filter).await
}

async fn ensure_live_box(conn: &mut SqliteConnection, box_id: BoxId) -> StorageResult<()> {
    let record = get_by_id::<BoxRecord>(conn, box_id)
        .await?
        .ok_or_else(|| StorageError::not_found(box_id))?;
    if record.meta.is_deleted() {
        return Err(StorageError::conflict(format!(
            "box {} is being deleted",
            record.name
        )));
    }
    Ok(())
}

// Port forwards

pub async fn list_port_forwards(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<PortForward>> {
    find_all(conn, &Filter::new().id("box_id", box_id).order_by("description")).await
}

/// Insert or update the rule keyed by (box, description). Returns true when
/// anything was written.
pub async fn upsert_port_forward(
    conn: &mut SqliteConnection,
    rule: &PortForward,
) -> StorageResult<bool> {
    let filter = Filter::new()
        .id("box_id", rule.box_id)
        .eq("description", &rule.description);
    let existing: Option<PortForward> = find_one(conn, &filter).await?;
    if existing.as_ref() == Some(rule) {
        return Ok(false);
    }

    ensure_live_box(conn, rule.box_id).await?;
    insert_port_forward(conn, rule).await?;
    bump::<BoxRecord>(conn, rule.box_id).await?;
    Ok(true)
}

async fn insert_port_forward(conn: &mut SqliteConnection, rule: &PortForward) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO box_port_forwards
            (box_id, description, protocol, host_port_first, host_port_last, sandbox_port)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (box_id, description) DO UPDATE SET
            protocol = excluded.protocol,
            host_port_first = excluded.host_port_first,
            host_port_last = excluded.host_port_last,
            sandbox_port = excluded.sandbox_port
        "#,
    )
    .bind(rule.box_id.to_db())
    .bind(&rule.description)
    .bind(rule.protocol.as_str())
    .bind(rule.host_port_first)
    .bind(rule.host_port_last)
    .bind(rule.sandbox_port)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Replace every rule of the box with `rules` if the sorted sets differ.
pub async fn replace_port_forwards(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    rules: &[PortForward],
) -> StorageResult<bool> {
    let mut existing = list_port_forwards(conn, box_id).await?;
    let mut wanted = rules.to_vec();
    existing.sort();
    wanted.sort();
    if existing == wanted {
        return Ok(false);
    }

    ensure_live_box(conn, box_id).await?;
    delete_where::<PortForward>(conn, &Filter::new().id("box_id", box_id)).await?;
    for rule in &wanted {
        insert_port_forward(conn, rule).await?;
    }
    bump::<BoxRecord>(conn, box_id).await?;
    Ok(true)
}

pub async fn delete_port_forward(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    description: &str,
) -> StorageResult<bool> {
    let filter = Filter::new()
        .id("box_id", box_id)
        .eq("description", description);
    let deleted = delete_where::<PortForward>(conn, &filter).await?;
    if deleted > 0 {
        bump::<BoxRecord>(conn, box_id).await?;
    }
    Ok(deleted > 0)
}

// Compose projects

pub async fn list_compose_projects(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<ComposeProject>> {
    find_all(conn, &Filter::new().id("box_id", box_id).order_by("name")).await
}

/// Write the project content if it differs. Returns true when written.
pub async fn upsert_compose_project(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    name: &str,
    content: &str,
) -> StorageResult<bool> {
    let filter = Filter::new().id("box_id", box_id).eq("name", name);
    let existing: Option<ComposeProject> = find_one(conn, &filter).await?;
    if existing.is_some_and(|p| p.content == content) {
        return Ok(false);
    }

    ensure_live_box(conn, box_id).await?;
    sqlx::query(
        r#"
        INSERT INTO box_compose_projects (box_id, name, content) VALUES (?, ?, ?)
        ON CONFLICT (box_id, name) DO UPDATE SET content = excluded.content
        "#,
    )
    .bind(box_id.to_db())
    .bind(name)
    .bind(content)
    .execute(&mut *conn)
    .await?;
    bump::<BoxRecord>(conn, box_id).await?;
    Ok(true)
}

pub async fn delete_compose_project(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    name: &str,
) -> StorageResult<bool> {
    let filter = Filter::new().id("box_id", box_id).eq("name", name);
    let deleted = delete_where::<ComposeProject>(conn, &filter).await?;
    if deleted > 0 {
        bump::<BoxRecord>(conn, box_id).await?;
    }
    Ok(deleted > 0)
}

// Volume attachments

pub async fn list_volume_attachments(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<VolumeAttachment>> {
    find_all(conn, &Filter::new().id("box_id", box_id).order_by("volume_id")).await
}

pub async fn list_attachments_for_volume(
    conn: &mut SqliteConnection,
    volume_id: VolumeId,
) -> StorageResult<Vec<VolumeAttachment>> {
    find_all(conn, &Filter::new().id("volume_id", volume_id).order_by("box_id")).await
}

/// Attach a live volume to a live box, bumping both.
pub async fn attach_volume(
    conn: &mut SqliteConnection,
    attachment: &VolumeAttachment,
) -> StorageResult<()> {
    ensure_live_box(conn, attachment.box_id).await?;
    let volume = get_by_id::<Volume>(conn, attachment.volume_id)
        .await?
        .ok_or_else(|| StorageError::not_found(attachment.volume_id))?;
    if volume.meta.is_deleted() {
        return Err(StorageError::conflict(format!(
            "volume {} is being deleted",
            volume.name
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO box_volume_attachments (box_id, volume_id, root_uid, root_gid, root_mode)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(attachment.box_id.to_db())
    .bind(attachment.volume_id.to_db())
    .bind(attachment.root_uid)
    .bind(attachment.root_gid)
    .bind(&attachment.root_mode)
    .execute(&mut *conn)
    .await?;

    bump::<BoxRecord>(conn, attachment.box_id).await?;
    bump::<Volume>(conn, attachment.volume_id).await?;
    Ok(())
}

/// Detach a volume, bumping both sides so the volume reconciler notices the
/// released reference.
pub async fn detach_volume(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    volume_id: VolumeId,
) -> StorageResult<bool> {
    let filter = Filter::new()
        .id("box_id", box_id)
        .id("volume_id", volume_id);
    let deleted = delete_where::<VolumeAttachment>(conn, &filter).await?;
    if deleted == 0 {
        return Ok(false);
    }
    bump::<BoxRecord>(conn, box_id).await?;
    bump::<Volume>(conn, volume_id).await?;
    Ok(true)
}

/// Remove every port forward and compose project of a box being torn down.
/// Returns how many rows went away.
pub async fn clear_box_runtime(conn: &mut SqliteConnection, box_id: BoxId) -> StorageResult<u64> {
    let filter = Filter::new().id("box_id", box_id);
    let forwards = delete_where::<PortForward>(conn, &filter).await?;
    let projects = delete_where::<ComposeProject>(conn, &filter).await?;
    Ok(forwards + projects)
}
