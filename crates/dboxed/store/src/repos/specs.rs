//! Spec sources and the mappings from spec entries to the objects they
//! materialised.

use chrono::{DateTime, Utc};
use dboxed_types::ids::{DboxedSpecId, EntityId, GitSpecId, SpecMappingId, WorkspaceId};
use dboxed_types::models::{DboxedSpec, GitSpec, MappedObjectType, SpecMapping, SpecSourceKind};
use dboxed_types::status::ObjectMeta;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::change_tracking::next_change_seq;
use crate::entity::{read_enum, read_id, read_meta, Entity, Record};
use crate::error::{StorageError, StorageResult};
use crate::querier::{delete_where, find_all, Filter};

impl Record for DboxedSpec {
    const TABLE: &'static str = "dboxed_specs";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            name: row.try_get("name")?,
            git_url: row.try_get("git_url")?,
            git_ref: row.try_get("git_ref")?,
            spec_file: row.try_get("spec_file")?,
            meta: read_meta(row)?,
        })
    }
}

impl Entity for DboxedSpec {
    type Id = DboxedSpecId;
    const KIND: &'static str = "dboxed spec";

    fn id(&self) -> DboxedSpecId {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

impl Record for GitSpec {
    const TABLE: &'static str = "git_specs";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            repository_url: row.try_get("repository_url")?,
            git_ref: row.try_get("git_ref")?,
            spec_file: row.try_get("spec_file")?,
            meta: read_meta(row)?,
        })
    }
}

impl Entity for GitSpec {
    type Id = GitSpecId;
    const KIND: &'static str = "git spec";

    fn id(&self) -> GitSpecId {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

impl Record for SpecMapping {
    const TABLE: &'static str = "spec_mappings";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        let object_id: String = row.try_get("object_id")?;
        let fragment: String = row.try_get("fragment")?;
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            source_kind: read_enum(row, "source_kind")?,
            source_key: row.try_get("source_key")?,
            object_type: read_enum(row, "object_type")?,
            name: row.try_get("name")?,
            object_id: Uuid::parse_str(&object_id)
                .map_err(|e| StorageError::InvalidData(format!("object_id {object_id}: {e}")))?,
            recreate_key: row.try_get("recreate_key")?,
            fragment: serde_json::from_str(&fragment)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Attributes of a dboxed spec to create
#[derive(Debug, Clone)]
pub struct NewDboxedSpec {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub git_url: String,
    pub git_ref: String,
    pub spec_file: String,
}

pub async fn create_dboxed_spec(
    conn: &mut SqliteConnection,
    new: NewDboxedSpec,
) -> StorageResult<DboxedSpec> {
    let seq = next_change_seq(conn).await?;
    let spec = DboxedSpec {
        id: DboxedSpecId::generate(),
        workspace_id: new.workspace_id,
        name: new.name,
        git_url: new.git_url,
        git_ref: new.git_ref,
        spec_file: new.spec_file,
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    sqlx::query(
        r#"
        INSERT INTO dboxed_specs (id, workspace_id, name, git_url, git_ref, spec_file, created_at, change_seq)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(spec.id.to_db())
    .bind(spec.workspace_id.to_db())
    .bind(&spec.name)
    .bind(&spec.git_url)
    .bind(&spec.git_ref)
    .bind(&spec.spec_file)
    .bind(spec.meta.created_at)
    .bind(seq)
    .execute(&mut *conn)
    .await?;
    Ok(spec)
}

/// Point a live dboxed spec at another git reference, e.g. a new commit.
pub async fn update_dboxed_spec_ref(
    conn: &mut SqliteConnection,
    id: DboxedSpecId,
    git_ref: &str,
) -> StorageResult<()> {
    let seq = next_change_seq(conn).await?;
    let result = sqlx::query(
        "UPDATE dboxed_specs SET git_ref = ?, change_seq = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(git_ref)
    .bind(seq)
    .bind(id.to_db())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::not_found(format!("live dboxed spec {id}")));
    }
    Ok(())
}

/// Attributes of a git spec to create
#[derive(Debug, Clone)]
pub struct NewGitSpec {
    pub workspace_id: WorkspaceId,
    pub repository_url: String,
    pub git_ref: String,
    pub spec_file: String,
}

pub async fn create_git_spec(conn: &mut SqliteConnection, new: NewGitSpec) -> StorageResult<GitSpec> {
    let seq = next_change_seq(conn).await?;
    let spec = GitSpec {
        id: GitSpecId::generate(),
        workspace_id: new.workspace_id,
        repository_url: new.repository_url,
        git_ref: new.git_ref,
        spec_file: new.spec_file,
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    sqlx::query(
        r#"
        INSERT INTO git_specs (id, workspace_id, repository_url, git_ref, spec_file, created_at, change_seq)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(spec.id.to_db())
    .bind(spec.workspace_id.to_db())
    .bind(&spec.repository_url)
    .bind(&spec.git_ref)
    .bind(&spec.spec_file)
    .bind(spec.meta.created_at)
    .bind(seq)
    .execute(&mut *conn)
    .await?;
    Ok(spec)
}

// Mappings

/// Mappings of one source scope, ordered by object type then name
pub async fn list_mappings(
    conn: &mut SqliteConnection,
    source_kind: SpecSourceKind,
    source_key: &str,
) -> StorageResult<Vec<SpecMapping>> {
    let filter = Filter::new()
        .eq("source_kind", source_kind.as_str())
        .eq("source_key", source_key);
    let mut mappings: Vec<SpecMapping> = find_all(conn, &filter).await?;
    mappings.sort_by(|a, b| (a.object_type, &a.name).cmp(&(b.object_type, &b.name)));
    Ok(mappings)
}

/// Attributes of a mapping to record
#[derive(Debug, Clone)]
pub struct NewMapping {
    pub workspace_id: WorkspaceId,
    pub source_kind: SpecSourceKind,
    pub source_key: String,
    pub object_type: MappedObjectType,
    pub name: String,
    pub object_id: Uuid,
    pub recreate_key: String,
    pub fragment: serde_json::Value,
}

pub async fn insert_mapping(
    conn: &mut SqliteConnection,
    new: NewMapping,
) -> StorageResult<SpecMapping> {
    let now: DateTime<Utc> = Utc::now();
    let mapping = SpecMapping {
        id: SpecMappingId::generate(),
        workspace_id: new.workspace_id,
        source_kind: new.source_kind,
        source_key: new.source_key,
        object_type: new.object_type,
        name: new.name,
        object_id: new.object_id,
        recreate_key: new.recreate_key,
        fragment: new.fragment,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO spec_mappings
            (id, workspace_id, source_kind, source_key, object_type, name, object_id,
             recreate_key, fragment, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(mapping.id.to_db())
    .bind(mapping.workspace_id.to_db())
    .bind(mapping.source_kind.as_str())
    .bind(&mapping.source_key)
    .bind(mapping.object_type.as_str())
    .bind(&mapping.name)
    .bind(mapping.object_id.to_string())
    .bind(&mapping.recreate_key)
    .bind(mapping.fragment.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(mapping)
}

/// Record the fragment that was last applied to the mapped object.
pub async fn update_mapping_fragment(
    conn: &mut SqliteConnection,
    id: SpecMappingId,
    fragment: &serde_json::Value,
) -> StorageResult<()> {
    sqlx::query("UPDATE spec_mappings SET fragment = ?, updated_at = ? WHERE id = ?")
        .bind(fragment.to_string())
        .bind(Utc::now())
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_mapping(conn: &mut SqliteConnection, id: SpecMappingId) -> StorageResult<bool> {
    let deleted = delete_where::<SpecMapping>(conn, &Filter::new().id("id", id)).await?;
    Ok(deleted > 0)
}
