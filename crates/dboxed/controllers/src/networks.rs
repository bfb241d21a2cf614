//! Network reconciler
//!
//! Holds [`FINALIZER`] on every network so it outlives the boxes, load
//! balancers and ingress proxies attached to it.

use async_trait::async_trait;
use dboxed_reconciler::{ReconcileError, ReconcileResult, Reconciler};
use dboxed_store::repos::networks;
use dboxed_store::{soft_delete, StorageResult, Store};
use dboxed_types::ids::NetworkId;
use dboxed_types::models::Network;
use dboxed_types::status::ReconcileStatus;
use tracing::debug;

use crate::finalizer;

pub const FINALIZER: &str = "dboxed-network-boxes";

pub struct NetworkReconciler {
    store: Store,
}

impl NetworkReconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn run(&self, network: &Network) -> Result<ReconcileResult, ReconcileError> {
        let mut conn = self.store.acquire().await?;

        if !network.meta.is_deleted() {
            if let Some(requeue) =
                finalizer::hold::<Network>(&mut conn, network.id, FINALIZER).await?
            {
                return Ok(requeue);
            }
            return Ok(ReconcileResult::ok());
        }

        let users = networks::count_network_users(&mut conn, network.id).await?;
        if users.active > 0 {
            return Ok(ReconcileResult::with_status(
                ReconcileStatus::deleting(),
                format!("{} objects still use network {}", users.active, network.name),
            ));
        }
        if users.releasing > 0 {
            return Ok(ReconcileResult::requeue(format!(
                "{} objects are being removed",
                users.releasing
            )));
        }

        if soft_delete::remove_finalizer::<Network>(&mut conn, network.id, FINALIZER).await? {
            debug!(network = %network.id, "Released network finalizer");
        }
        Ok(ReconcileResult::ok())
    }
}

#[async_trait]
impl Reconciler for NetworkReconciler {
    type Item = Network;

    async fn get_item(&self, id: NetworkId) -> StorageResult<Option<Network>> {
        self.store.get::<Network>(id).await
    }

    async fn reconcile(&self, network: &Network) -> ReconcileResult {
        self.run(network).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_box, fixture};
    use dboxed_types::models::BoxRecord;

    #[tokio::test]
    async fn test_live_network_gets_finalizer() {
        let fx = fixture().await;
        let reconciler = NetworkReconciler::new(fx.store.clone());

        let result = reconciler.reconcile(&fx.network).await;
        assert!(!result.is_error());
        let network = fx.store.get::<Network>(fx.network.id).await.unwrap().unwrap();
        assert!(network.meta.finalizers.contains(FINALIZER));
    }

    #[tokio::test]
    async fn test_deleted_network_waits_for_boxes() {
        let fx = fixture().await;
        let reconciler = NetworkReconciler::new(fx.store.clone());
        reconciler.reconcile(&fx.network).await;
        let boxed = create_box(&fx, "web").await;

        let mut conn = fx.store.acquire().await.unwrap();
        soft_delete::soft_delete::<Network>(&mut conn, fx.network.id).await.unwrap();
        drop(conn);

        let network = fx.store.get::<Network>(fx.network.id).await.unwrap().unwrap();
        let result = reconciler.reconcile(&network).await;
        assert_eq!(result.effective_status(), ReconcileStatus::deleting());

        // A soft-deleted box without finalizers only waits for its hard delete
        let mut conn = fx.store.acquire().await.unwrap();
        soft_delete::soft_delete::<BoxRecord>(&mut conn, boxed.id).await.unwrap();
        drop(conn);
        let result = reconciler.reconcile(&network).await;
        assert!(result.requeue);

        fx.store.hard_delete_finalized::<BoxRecord>(boxed.id).await.unwrap();
        let result = reconciler.reconcile(&network).await;
        assert_eq!(result.effective_status(), ReconcileStatus::Ok);
        assert!(fx.store.hard_delete_finalized::<Network>(network.id).await.unwrap());
    }
}
