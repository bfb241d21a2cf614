//! Box reconciler
//!
//! A box owns its runtime rows (port forwards, compose projects, volume
//! attachments, routing entries and replica memberships). [`FINALIZER`]
//! keeps the box row until all of them are gone.

use async_trait::async_trait;
use dboxed_reconciler::{ReconcileError, ReconcileResult, Reconciler};
use dboxed_store::change_tracking::bump;
use dboxed_store::repos::{boxes, replica_sets};
use dboxed_store::{soft_delete, StorageResult, Store};
use dboxed_types::ids::{BoxId, IngressProxyId, LoadBalancerId};
use dboxed_types::models::{BoxRecord, Network};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::finalizer;

pub const FINALIZER: &str = "dboxed-box-runtime";

pub struct BoxReconciler {
    store: Store,
}

impl BoxReconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn run(&self, record: &BoxRecord) -> Result<ReconcileResult, ReconcileError> {
        if !record.meta.is_deleted() {
            let mut conn = self.store.acquire().await?;
            if let Some(requeue) =
                finalizer::hold::<BoxRecord>(&mut conn, record.id, FINALIZER).await?
            {
                return Ok(requeue);
            }
            return Ok(ReconcileResult::ok());
        }

        if !record.meta.finalizers.contains(FINALIZER) {
            return Ok(ReconcileResult::ok());
        }

        let mut tx = self.store.begin().await?;
        let released = teardown(&mut tx, record).await?;
        soft_delete::remove_finalizer::<BoxRecord>(&mut tx, record.id, FINALIZER).await?;
        tx.commit().await?;

        info!(r#box = %record.id, name = %record.name, released, "Box runtime torn down");
        Ok(ReconcileResult::ok())
    }
}

/// Remove everything the box holds and wake the objects it referenced.
/// Returns the number of removed rows.
async fn teardown(conn: &mut SqliteConnection, record: &BoxRecord) -> Result<u64, ReconcileError> {
    let mut released = 0;

    for attachment in boxes::list_volume_attachments(conn, record.id).await? {
        if boxes::detach_volume(conn, record.id, attachment.volume_id).await? {
            released += 1;
        }
    }
    released += boxes::clear_box_runtime(conn, record.id).await?;

    released += release_routing::<LoadBalancerId>(conn, record.id).await?;
    released += release_routing::<IngressProxyId>(conn, record.id).await?;

    if let Some(network_id) = record.network_id {
        bump::<Network>(conn, network_id).await?;
    }
    Ok(released)
}

async fn release_routing<I: replica_sets::ReplicaSetId>(
    conn: &mut SqliteConnection,
    box_id: BoxId,
) -> StorageResult<u64> {
    let services = replica_sets::delete_services_for_box::<I>(conn, box_id).await?;
    let memberships = replica_sets::release_box_memberships::<I>(conn, box_id).await?;
    for owner in &memberships {
        debug!(kind = I::KIND, %owner, r#box = %box_id, "Released replica membership");
    }
    Ok((services.len() + memberships.len()) as u64)
}

#[async_trait]
impl Reconciler for BoxReconciler {
    type Item = BoxRecord;

    async fn get_item(&self, id: BoxId) -> StorageResult<Option<BoxRecord>> {
        self.store.get::<BoxRecord>(id).await
    }

    async fn reconcile(&self, record: &BoxRecord) -> ReconcileResult {
        self.run(record).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_box, create_volume, fixture};
    use dboxed_store::repos::replica_sets::{NewReplicaSet, ServiceEntry};
    use dboxed_types::models::{
        IngressProxy, PortForward, Protocol, ReplicaMember, Volume, VolumeAttachment,
    };

    #[tokio::test]
    async fn test_deleted_box_releases_everything() {
        let fx = fixture().await;
        let reconciler = BoxReconciler::new(fx.store.clone());
        let record = create_box(&fx, "web").await;
        let volume = create_volume(&fx, "data").await;
        reconciler.reconcile(&record).await;

        let mut conn = fx.store.acquire().await.unwrap();
        let attachment = VolumeAttachment {
            box_id: record.id,
            volume_id: volume.id,
            root_uid: 0,
            root_gid: 0,
            root_mode: "0700".to_string(),
        };
        boxes::attach_volume(&mut conn, &attachment).await.unwrap();
        boxes::upsert_compose_project(&mut conn, record.id, "app", "services: {}")
            .await
            .unwrap();
        let rule = PortForward {
            box_id: record.id,
            description: "ssh".to_string(),
            protocol: Protocol::Tcp,
            host_port_first: 2222,
            host_port_last: 2222,
            sandbox_port: 22,
        };
        boxes::upsert_port_forward(&mut conn, &rule).await.unwrap();

        let proxy: IngressProxy = replica_sets::create_replica_set(
            &mut conn,
            NewReplicaSet {
                workspace_id: fx.workspace.id,
                name: "edge".to_string(),
                network_id: fx.network.id,
                replicas: 1,
                http_port: 8080,
                https_port: 8443,
            },
        )
        .await
        .unwrap();
        let entry = ServiceEntry {
            box_id: Some(record.id),
            description: "web-0".to_string(),
            hostname: "web.example.com".to_string(),
            path_prefix: "/".to_string(),
            port: 8000,
        };
        replica_sets::upsert_service(&mut conn, proxy.id, &entry).await.unwrap();
        let member = ReplicaMember {
            owner_id: proxy.id,
            box_id: record.id,
            ordinal: 1,
        };
        replica_sets::add_member(&mut conn, &member).await.unwrap();

        soft_delete::soft_delete::<BoxRecord>(&mut conn, record.id).await.unwrap();
        drop(conn);

        let deleted = fx.store.get::<BoxRecord>(record.id).await.unwrap().unwrap();
        let result = reconciler.reconcile(&deleted).await;
        assert!(!result.is_error(), "{}", result.user_message);

        let mut conn = fx.store.acquire().await.unwrap();
        assert!(boxes::list_volume_attachments(&mut conn, record.id).await.unwrap().is_empty());
        assert!(boxes::list_port_forwards(&mut conn, record.id).await.unwrap().is_empty());
        assert!(boxes::list_compose_projects(&mut conn, record.id).await.unwrap().is_empty());
        assert!(replica_sets::list_services::<IngressProxyId>(&mut conn, proxy.id)
            .await
            .unwrap()
            .is_empty());
        assert!(replica_sets::list_members::<IngressProxyId>(&mut conn, proxy.id)
            .await
            .unwrap()
            .is_empty());
        drop(conn);

        let volume_after = fx.store.get::<Volume>(volume.id).await.unwrap().unwrap();
        assert!(volume_after.meta.change_seq > volume.meta.change_seq);
        let proxy_after = fx.store.get::<IngressProxy>(proxy.id).await.unwrap().unwrap();
        assert!(proxy_after.meta.change_seq > proxy.meta.change_seq);
        assert!(fx.store.hard_delete_finalized::<BoxRecord>(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_live_box_holds_finalizer() {
        let fx = fixture().await;
        let reconciler = BoxReconciler::new(fx.store.clone());
        let record = create_box(&fx, "web").await;
        reconciler.reconcile(&record).await;

        let mut conn = fx.store.acquire().await.unwrap();
        soft_delete::soft_delete::<BoxRecord>(&mut conn, record.id).await.unwrap();
        drop(conn);
        assert!(!fx.store.hard_delete_finalized::<BoxRecord>(record.id).await.unwrap());
    }
}
