//! Networks

use chrono::Utc;
use dboxed_types::ids::{EntityId, NetworkId, WorkspaceId};
use dboxed_types::models::{BoxRecord, IngressProxy, LoadBalancer, Network};
use dboxed_types::status::ObjectMeta;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::change_tracking::next_change_seq;
use crate::entity::{read_id, read_meta, Entity, Record};
use crate::error::StorageResult;
use crate::querier::{count, find_one, Filter};

impl Record for Network {
    const TABLE: &'static str = "networks";

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            name: row.try_get("name")?,
            meta: read_meta(row)?,
        })
    }
}

impl Entity for Network {
    type Id = NetworkId;
    const KIND: &'static str = "network";

    fn id(&self) -> NetworkId {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

pub async fn create_network(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
) -> StorageResult<Network> {
    let seq = next_change_seq(conn).await?;
    let network = Network {
        id: NetworkId::generate(),
        workspace_id,
        name: name.to_string(),
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    sqlx::query(
        "INSERT INTO networks (id, workspace_id, name, created_at, change_seq) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(network.id.to_db())
    .bind(workspace_id.to_db())
    .bind(&network.name)
    .bind(network.meta.created_at)
    .bind(seq)
    .execute(&mut *conn)
    .await?;
    Ok(network)
}

/// Live network by name
pub async fn get_network_by_name(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
) -> StorageResult<Option<Network>> {
    let filter = Filter::new()
        .id("workspace_id", workspace_id)
        .eq("name", name)
        .live();
    find_one(conn, &filter).await
}

/// Rows that still hold a foreign key on a network
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkUsers {
    /// Live rows, or soft-deleted rows whose finalizers are still pending
    pub active: i64,
    /// Soft-deleted rows with no finalizers left, waiting for their hard delete
    pub releasing: i64,
}

impl NetworkUsers {
    pub fn is_empty(&self) -> bool {
        self.active == 0 && self.releasing == 0
    }
}

/// Count boxes, load balancers and ingress proxies referencing the network.
pub async fn count_network_users(
    conn: &mut SqliteConnection,
    network_id: NetworkId,
) -> StorageResult<NetworkUsers> {
    let all = Filter::new().id("network_id", network_id);
    let releasing = all.clone().is_not_null("deleted_at").eq("finalizers", "[]");

    let mut total = 0;
    let mut done = 0;
    total += count::<BoxRecord>(conn, &all).await?;
    done += count::<BoxRecord>(conn, &releasing).await?;
    total += count::<LoadBalancer>(conn, &all).await?;
    done += count::<LoadBalancer>(conn, &releasing).await?;
    total += count::<IngressProxy>(conn, &all).await?;
    done += count::<IngressProxy>(conn, &releasing).await?;

    Ok(NetworkUsers {
        active: total - done,
        releasing: done,
    })
}
