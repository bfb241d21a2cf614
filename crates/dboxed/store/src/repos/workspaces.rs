//! Workspaces

use chrono::Utc;
use dboxed_types::ids::{EntityId, WorkspaceId};
use dboxed_types::models::Workspace;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::entity::{read_id, Record};
use crate::error::StorageResult;
use crate::querier::{find_one, Filter};

impl Record for Workspace {
    const TABLE: &'static str = "workspaces";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub async fn create_workspace(conn: &mut SqliteConnection, name: &str) -> StorageResult<Workspace> {
    let workspace = Workspace {
        id: WorkspaceId::generate(),
        name: name.to_string(),
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO workspaces (id, name, created_at) VALUES (?, ?, ?)")
        .bind(workspace.id.to_db())
        .bind(&workspace.name)
        .bind(workspace.created_at)
        .execute(&mut *conn)
        .await?;
    Ok(workspace)
}

pub async fn get_workspace_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> StorageResult<Option<Workspace>> {
    find_one(conn, &Filter::new().eq("name", name)).await
}
