//! Replica-set owners (load balancers and ingress proxies), their member
//! boxes and their routing services.
//!
//! Both owner kinds share one table layout; [`ReplicaSetId`] supplies the
//! table names for each.

use chrono::Utc;
use dboxed_types::ids::{
    BoxId, EntityId, IngressProxyId, LoadBalancerId, NetworkId, ServiceId, WorkspaceId,
};
use dboxed_types::models::{Network, ReplicaMember, ReplicaSetRecord, RoutingService};
use dboxed_types::status::ObjectMeta;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::change_tracking::{bump, next_change_seq};
use crate::entity::{read_id, read_meta, read_opt_id, Entity, Record};
use crate::error::{StorageError, StorageResult};
use crate::querier::{find_all, find_one, get_by_id, Filter};

/// Id of a replica-set owner kind, naming its tables
pub trait ReplicaSetId: EntityId {
    const KIND: &'static str;
    const TABLE: &'static str;
    const MEMBERS_TABLE: &'static str;
    const SERVICES_TABLE: &'static str;
}

impl ReplicaSetId for LoadBalancerId {
    const KIND: &'static str = "load balancer";
    const TABLE: &'static str = "load_balancers";
    const MEMBERS_TABLE: &'static str = "load_balancer_boxes";
    const SERVICES_TABLE: &'static str = "load_balancer_services";
}

impl ReplicaSetId for IngressProxyId {
    const KIND: &'static str = "ingress proxy";
    const TABLE: &'static str = "ingress_proxies";
    const MEMBERS_TABLE: &'static str = "ingress_proxy_boxes";
    const SERVICES_TABLE: &'static str = "ingress_proxy_services";
}

impl<I: ReplicaSetId> Record for ReplicaSetRecord<I> {
    const TABLE: &'static str = I::TABLE;

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            workspace_id: read_id(row, "workspace_id")?,
            name: row.try_get("name")?,
            network_id: read_id(row, "network_id")?,
            replicas: row.try_get("replicas")?,
            http_port: row.try_get("http_port")?,
            https_port: row.try_get("https_port")?,
            meta: read_meta(row)?,
        })
    }
}

impl<I: ReplicaSetId> Entity for ReplicaSetRecord<I> {
    type Id = I;
    const KIND: &'static str = <I as ReplicaSetId>::KIND;

    fn id(&self) -> I {
        self.id
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

impl<I: ReplicaSetId> Record for ReplicaMember<I> {
    const TABLE: &'static str = I::MEMBERS_TABLE;

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            owner_id: read_id(row, "owner_id")?,
            box_id: read_id(row, "box_id")?,
            ordinal: row.try_get("ordinal")?,
        })
    }
}

impl<I: ReplicaSetId> Record for RoutingService<I> {
    const TABLE: &'static str = I::SERVICES_TABLE;

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            owner_id: read_id(row, "owner_id")?,
            box_id: read_opt_id(row, "box_id")?,
            description: row.try_get("description")?,
            hostname: row.try_get("hostname")?,
            path_prefix: row.try_get("path_prefix")?,
            port: row.try_get("port")?,
        })
    }
}

/// Attributes of a replica-set owner to create
#[derive(Debug, Clone)]
pub struct NewReplicaSet {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub network_id: NetworkId,
    pub replicas: u32,
    pub http_port: u16,
    pub https_port: u16,
}

pub async fn create_replica_set<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    new: NewReplicaSet,
) -> StorageResult<ReplicaSetRecord<I>> {
    let network = get_by_id::<Network>(conn, new.network_id)
        .await?
        .ok_or_else(|| StorageError::not_found(new.network_id))?;
    if network.meta.is_deleted() {
        return Err(StorageError::conflict(format!(
            "network {} is being deleted",
            network.name
        )));
    }

    let seq = next_change_seq(conn).await?;
    let record = ReplicaSetRecord {
        id: I::from_uuid(uuid::Uuid::new_v4()),
        workspace_id: new.workspace_id,
        name: new.name,
        network_id: new.network_id,
        replicas: new.replicas,
        http_port: new.http_port,
        https_port: new.https_port,
        meta: ObjectMeta::new(Utc::now(), seq),
    };
    let sql = format!(
        r#"
        INSERT INTO {} (id, workspace_id, name, network_id, replicas, http_port, https_port, created_at, change_seq)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        I::TABLE
    );
    sqlx::query(&sql)
        .bind(record.id.to_db())
        .bind(record.workspace_id.to_db())
        .bind(&record.name)
        .bind(record.network_id.to_db())
        .bind(record.replicas)
        .bind(record.http_port)
        .bind(record.https_port)
        .bind(record.meta.created_at)
        .bind(seq)
        .execute(&mut *conn)
        .await?;
    Ok(record)
}

/// Live owner by name
pub async fn get_replica_set_by_name<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
) -> StorageResult<Option<ReplicaSetRecord<I>>> {
    let filter = Filter::new()
        .id("workspace_id", workspace_id)
        .eq("name", name)
        .live();
    find_one(conn, &filter).await
}

/// Change the declared replica count of a live owner.
pub async fn set_replicas<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    id: I,
    replicas: u32,
) -> StorageResult<()> {
    let seq = next_change_seq(conn).await?;
    let sql = format!(
        "UPDATE {} SET replicas = ?, change_seq = ? WHERE id = ? AND deleted_at IS NULL",
        I::TABLE
    );
    let result = sqlx::query(&sql)
        .bind(replicas)
        .bind(seq)
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::not_found(format!("live {} {}", <I as ReplicaSetId>::KIND, id)));
    }
    Ok(())
}

// Members

/// Members ordered by ordinal
pub async fn list_members<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    owner_id: I,
) -> StorageResult<Vec<ReplicaMember<I>>> {
    find_all(conn, &Filter::new().id("owner_id", owner_id).order_by("ordinal")).await
}

pub async fn add_member<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    member: &ReplicaMember<I>,
) -> StorageResult<()> {
    let sql = format!(
        "INSERT INTO {} (owner_id, box_id, ordinal) VALUES (?, ?, ?)",
        I::MEMBERS_TABLE
    );
    sqlx::query(&sql)
        .bind(member.owner_id.to_db())
        .bind(member.box_id.to_db())
        .bind(member.ordinal)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn remove_member<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    owner_id: I,
    box_id: BoxId,
) -> StorageResult<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE owner_id = ? AND box_id = ?",
        I::MEMBERS_TABLE
    );
    let result = sqlx::query(&sql)
        .bind(owner_id.to_db())
        .bind(box_id.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Drop every membership of a box and bump the owners that lost a member.
pub async fn release_box_memberships<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<I>> {
    let members: Vec<ReplicaMember<I>> =
        find_all(conn, &Filter::new().id("box_id", box_id)).await?;
    let mut owners = Vec::with_capacity(members.len());
    for member in members {
        remove_member(conn, member.owner_id, box_id).await?;
        bump::<ReplicaSetRecord<I>>(conn, member.owner_id).await?;
        owners.push(member.owner_id);
    }
    Ok(owners)
}

// Routing services

/// Attributes of a routing service entry, keyed by (owner, description)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceEntry {
    pub box_id: Option<BoxId>,
    pub description: String,
    pub hostname: String,
    pub path_prefix: String,
    pub port: u16,
}

impl<I> From<&RoutingService<I>> for ServiceEntry {
    fn from(service: &RoutingService<I>) -> Self {
        Self {
            box_id: service.box_id,
            description: service.description.clone(),
            hostname: service.hostname.clone(),
            path_prefix: service.path_prefix.clone(),
            port: service.port,
        }
    }
}

/// Services ordered by description
pub async fn list_services<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    owner_id: I,
) -> StorageResult<Vec<RoutingService<I>>> {
    find_all(conn, &Filter::new().id("owner_id", owner_id).order_by("description")).await
}

pub async fn list_services_for_box<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<RoutingService<I>>> {
    find_all(conn, &Filter::new().id("box_id", box_id).order_by("description")).await
}

/// Insert or update the entry keyed by (owner, description), bumping the
/// owner when anything changed.
pub async fn upsert_service<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    owner_id: I,
    entry: &ServiceEntry,
) -> StorageResult<bool> {
    let filter = Filter::new()
        .id("owner_id", owner_id)
        .eq("description", &entry.description);
    let existing: Option<RoutingService<I>> = find_one(conn, &filter).await?;
    if existing.as_ref().map(ServiceEntry::from).as_ref() == Some(entry) {
        return Ok(false);
    }

    let sql = format!(
        r#"
        INSERT INTO {} (id, owner_id, box_id, description, hostname, path_prefix, port)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (owner_id, description) DO UPDATE SET
            box_id = excluded.box_id,
            hostname = excluded.hostname,
            path_prefix = excluded.path_prefix,
            port = excluded.port
        "#,
        I::SERVICES_TABLE
    );
    sqlx::query(&sql)
        .bind(ServiceId::generate().to_db())
        .bind(owner_id.to_db())
        .bind(entry.box_id.map(|id| id.to_db()))
        .bind(&entry.description)
        .bind(&entry.hostname)
        .bind(&entry.path_prefix)
        .bind(entry.port)
        .execute(&mut *conn)
        .await?;
    bump::<ReplicaSetRecord<I>>(conn, owner_id).await?;
    Ok(true)
}

/// Delete one entry, bumping the owner when it existed.
pub async fn delete_service<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    owner_id: I,
    description: &str,
) -> StorageResult<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE owner_id = ? AND description = ?",
        I::SERVICES_TABLE
    );
    let result = sqlx::query(&sql)
        .bind(owner_id.to_db())
        .bind(description)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }
    bump::<ReplicaSetRecord<I>>(conn, owner_id).await?;
    Ok(true)
}

/// Delete every entry targeting a box and bump each affected owner.
pub async fn delete_services_for_box<I: ReplicaSetId>(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<Vec<I>> {
    let services = list_services_for_box::<I>(conn, box_id).await?;
    let mut owners: Vec<I> = services.iter().map(|s| s.owner_id).collect();
    owners.sort();
    owners.dedup();

    let sql = format!("DELETE FROM {} WHERE box_id = ?", I::SERVICES_TABLE);
    sqlx::query(&sql)
        .bind(box_id.to_db())
        .execute(&mut *conn)
        .await?;
    for owner in &owners {
        bump::<ReplicaSetRecord<I>>(conn, *owner).await?;
    }
    Ok(owners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::boxes::{create_box, NewBox};
    use crate::testing::store_with_network;
    use dboxed_types::models::{BoxType, LoadBalancer};

    #[tokio::test]
    async fn test_members_and_services() {
        let (store, workspace, network) = store_with_network().await;
        let mut conn = store.acquire().await.unwrap();

        let lb: LoadBalancer = create_replica_set(
            &mut conn,
            NewReplicaSet {
                workspace_id: workspace.id,
                name: "edge".into(),
                network_id: network.id,
                replicas: 2,
                http_port: 80,
                https_port: 443,
            },
        )
        .await
        .unwrap();
        let member_box = create_box(
            &mut conn,
            NewBox {
                workspace_id: workspace.id,
                name: "lb-edge-1".into(),
                box_type: BoxType::LoadBalancer,
                network_id: Some(network.id),
            },
        )
        .await
        .unwrap();
        add_member(
            &mut conn,
            &ReplicaMember {
                owner_id: lb.id,
                box_id: member_box.id,
                ordinal: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(list_members(&mut conn, lb.id).await.unwrap().len(), 1);

        let entry = ServiceEntry {
            box_id: Some(member_box.id),
            description: "web".into(),
            hostname: "web.example.com".into(),
            path_prefix: "/".into(),
            port: 8080,
        };
        assert!(upsert_service(&mut conn, lb.id, &entry).await.unwrap());
        assert!(!upsert_service(&mut conn, lb.id, &entry).await.unwrap());
        let services = list_services(&mut conn, lb.id).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(ServiceEntry::from(&services[0]), entry);

        let owners = delete_services_for_box::<LoadBalancerId>(&mut conn, member_box.id)
            .await
            .unwrap();
        assert_eq!(owners, vec![lb.id]);
        assert!(list_services(&mut conn, lb.id).await.unwrap().is_empty());

        let before = get_by_id::<LoadBalancer>(&mut conn, lb.id).await.unwrap().unwrap();
        let owners = release_box_memberships::<LoadBalancerId>(&mut conn, member_box.id)
            .await
            .unwrap();
        assert_eq!(owners, vec![lb.id]);
        assert!(list_members(&mut conn, lb.id).await.unwrap().is_empty());
        let after = get_by_id::<LoadBalancer>(&mut conn, lb.id).await.unwrap().unwrap();
        assert!(after.meta.change_seq > before.meta.change_seq);
    }

    #[tokio::test]
    async fn test_set_replicas_bumps_owner() {
        let (store, workspace, network) = store_with_network().await;
        let mut conn = store.acquire().await.unwrap();
        let proxy = create_replica_set::<IngressProxyId>(
            &mut conn,
            NewReplicaSet {
                workspace_id: workspace.id,
                name: "ingress".into(),
                network_id: network.id,
                replicas: 1,
                http_port: 8080,
                https_port: 8443,
            },
        )
        .await
        .unwrap();

        set_replicas(&mut conn, proxy.id, 3).await.unwrap();
        let found = get_replica_set_by_name::<IngressProxyId>(&mut conn, workspace.id, "ingress")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.replicas, 3);
        assert!(found.meta.change_seq > proxy.meta.change_seq);
    }
}
