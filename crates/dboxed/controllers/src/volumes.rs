//! Volume reconciler

use async_trait::async_trait;
use dboxed_reconciler::{ReconcileError, ReconcileResult, Reconciler};
use dboxed_store::repos::boxes;
use dboxed_store::{soft_delete, StorageResult, Store};
use dboxed_types::ids::VolumeId;
use dboxed_types::models::Volume;
use dboxed_types::status::ReconcileStatus;
use tracing::debug;

use crate::finalizer;

/// Held until no box has the volume attached
pub const FINALIZER: &str = "dboxed-volume-attachments";

pub struct VolumeReconciler {
    store: Store,
}

impl VolumeReconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn run(&self, volume: &Volume) -> Result<ReconcileResult, ReconcileError> {
        let mut conn = self.store.acquire().await?;

        if !volume.meta.is_deleted() {
            if let Some(requeue) =
                finalizer::hold::<Volume>(&mut conn, volume.id, FINALIZER).await?
            {
                return Ok(requeue);
            }
            return Ok(ReconcileResult::ok());
        }

        let attachments = boxes::list_attachments_for_volume(&mut conn, volume.id).await?;
        if !attachments.is_empty() {
            return Ok(ReconcileResult::with_status(
                ReconcileStatus::deleting(),
                format!(
                    "volume {} is still attached to {} boxes",
                    volume.name,
                    attachments.len()
                ),
            ));
        }

        if soft_delete::remove_finalizer::<Volume>(&mut conn, volume.id, FINALIZER).await? {
            debug!(volume = %volume.id, "Released volume finalizer");
        }
        Ok(ReconcileResult::ok())
    }
}

#[async_trait]
impl Reconciler for VolumeReconciler {
    type Item = Volume;

    async fn get_item(&self, id: VolumeId) -> StorageResult<Option<Volume>> {
        self.store.get::<Volume>(id).await
    }

    async fn reconcile(&self, volume: &Volume) -> ReconcileResult {
        self.run(volume).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_box, create_volume, fixture};
    use dboxed_types::models::VolumeAttachment;

    #[tokio::test]
    async fn test_deleted_volume_waits_for_detach() {
        let fx = fixture().await;
        let reconciler = VolumeReconciler::new(fx.store.clone());
        let volume = create_volume(&fx, "data").await;
        let record = create_box(&fx, "db").await;
        reconciler.reconcile(&volume).await;

        let mut conn = fx.store.acquire().await.unwrap();
        let attachment = VolumeAttachment {
            box_id: record.id,
            volume_id: volume.id,
            root_uid: 1000,
            root_gid: 1000,
            root_mode: "0750".to_string(),
        };
        boxes::attach_volume(&mut conn, &attachment).await.unwrap();
        soft_delete::soft_delete::<Volume>(&mut conn, volume.id).await.unwrap();
        drop(conn);

        let deleted = fx.store.get::<Volume>(volume.id).await.unwrap().unwrap();
        let result = reconciler.reconcile(&deleted).await;
        assert_eq!(result.effective_status(), ReconcileStatus::deleting());
        assert!(result.user_message.contains("attached to 1 boxes"));

        let mut conn = fx.store.acquire().await.unwrap();
        boxes::detach_volume(&mut conn, record.id, volume.id).await.unwrap();
        drop(conn);

        let result = reconciler.reconcile(&deleted).await;
        assert_eq!(result.effective_status(), ReconcileStatus::Ok);
        assert!(fx.store.hard_delete_finalized::<Volume>(volume.id).await.unwrap());
    }
}
