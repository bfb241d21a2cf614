//! Finalizer helpers shared by the reconcilers

use dboxed_reconciler::{ReconcileError, ReconcileResult};
use dboxed_store::{soft_delete, Entity};
use sqlx::SqliteConnection;

/// Make sure `key` is held on a live row.
///
/// Returns `None` when the key is in place. If the row was soft-deleted after
/// it was loaded, the cycle is requeued so the next one takes the deletion
/// path.
pub(crate) async fn hold<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
    key: &str,
) -> Result<Option<ReconcileResult>, ReconcileError> {
    match soft_delete::add_finalizer::<E>(conn, id, key).await {
        Ok(_) => Ok(None),
        Err(e) if e.is_conflict() => Ok(Some(ReconcileResult::requeue(format!(
            "{} {id} was deleted while reconciling",
            E::KIND
        )))),
        Err(e) => Err(e.into()),
    }
}
