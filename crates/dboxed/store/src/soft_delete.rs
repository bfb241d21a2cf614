//! Soft-delete and finalizer protocol
//!
//! Deleting a reconciled row only stamps `deleted_at`. The row stays until
//! every finalizer owner has cleaned up after it and removed its key; the
//! control loop then hard-deletes it. Rows that are soft-deleted may only
//! lose finalizers, have their status written or be hard-deleted.

use chrono::Utc;
use dboxed_types::ids::EntityId;
use dboxed_types::status::{Finalizers, ReconcileStatus};
use sqlx::{Connection, Row, SqliteConnection};
use tracing::debug;

use crate::change_tracking::next_change_seq;
use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};

/// Outcome of probing whether a row could be hard-deleted right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteProbe {
    /// No foreign key references the row
    Clear,
    /// Dependent rows still reference it
    Blocked,
}

/// Mark a row deleted. Returns false when it already was.
pub async fn soft_delete<E: Entity>(conn: &mut SqliteConnection, id: E::Id) -> StorageResult<bool> {
    let seq = next_change_seq(conn).await?;
    let sql = format!(
        "UPDATE {} SET deleted_at = ?, change_seq = ? WHERE id = ? AND deleted_at IS NULL",
        E::TABLE
    );
    let result = sqlx::query(&sql)
        .bind(Utc::now())
        .bind(seq)
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 1 {
        debug!(kind = E::KIND, %id, "Soft-deleted");
        return Ok(true);
    }

    // Distinguish "already deleted" from "missing"
    load_finalizers::<E>(conn, id).await?;
    Ok(false)
}

/// Probe the real delete inside a savepoint, then soft-delete.
///
/// The probe is always rolled back, so cascades it would have triggered do not
/// happen and the rest of the caller's transaction is untouched.
pub async fn soft_delete_with_constraints<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
) -> StorageResult<DeleteProbe> {
    let probe = {
        let mut savepoint = conn.begin().await?;
        let sql = format!("DELETE FROM {} WHERE id = ?", E::TABLE);
        let attempt = sqlx::query(&sql)
            .bind(id.to_db())
            .execute(&mut *savepoint)
            .await;
        savepoint.rollback().await?;

        match attempt {
            Ok(_) => DeleteProbe::Clear,
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => DeleteProbe::Blocked,
            Err(err) => return Err(err.into()),
        }
    };

    soft_delete::<E>(conn, id).await?;
    debug!(kind = E::KIND, %id, ?probe, "Soft-deleted with constraint probe");
    Ok(probe)
}

/// Add a finalizer key. Returns true when the set changed.
///
/// Rejected with [`StorageError::Conflict`] once the row is soft-deleted.
pub async fn add_finalizer<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
    key: &str,
) -> StorageResult<bool> {
    let (deleted, mut finalizers) = load_finalizers::<E>(conn, id).await?;
    if deleted {
        return Err(StorageError::conflict(format!(
            "{} {} is being deleted, cannot add finalizer {}",
            E::KIND,
            id,
            key
        )));
    }
    if !finalizers.insert(key) {
        return Ok(false);
    }
    write_finalizers::<E>(conn, id, &finalizers).await?;
    Ok(true)
}

/// Remove a finalizer key. Returns true when the set changed.
pub async fn remove_finalizer<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
    key: &str,
) -> StorageResult<bool> {
    let (_, mut finalizers) = load_finalizers::<E>(conn, id).await?;
    if !finalizers.remove(key) {
        return Ok(false);
    }
    write_finalizers::<E>(conn, id, &finalizers).await?;
    debug!(kind = E::KIND, %id, key, "Removed finalizer");
    Ok(true)
}

/// Hard-delete a soft-deleted row whose finalizer set is empty.
///
/// Returns false when the row is live, still has finalizers or is gone.
pub async fn hard_delete_finalized<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
) -> StorageResult<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE id = ? AND deleted_at IS NOT NULL AND finalizers = '[]'",
        E::TABLE
    );
    let result = sqlx::query(&sql).bind(id.to_db()).execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

/// Persist the reconcile status. Bookkeeping only: never bumps the sequence
/// and is allowed on soft-deleted rows.
pub async fn set_status<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
    status: &ReconcileStatus,
    details: &str,
) -> StorageResult<()> {
    let sql = format!(
        "UPDATE {} SET reconcile_status = ?, reconcile_status_details = ? WHERE id = ?",
        E::TABLE
    );
    sqlx::query(&sql)
        .bind(status.as_str())
        .bind(details)
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load_finalizers<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
) -> StorageResult<(bool, Finalizers)> {
    let sql = format!(
        "SELECT deleted_at IS NOT NULL AS deleted, finalizers FROM {} WHERE id = ?",
        E::TABLE
    );
    let row = sqlx::query(&sql)
        .bind(id.to_db())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StorageError::not_found(format!("{} {}", E::KIND, id)))?;

    let deleted: i64 = row.try_get("deleted")?;
    let raw: String = row.try_get("finalizers")?;
    Ok((deleted != 0, Finalizers::from_json(&raw)?))
}

async fn write_finalizers<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
    finalizers: &Finalizers,
) -> StorageResult<()> {
    let seq = next_change_seq(conn).await?;
    let sql = format!(
        "UPDATE {} SET finalizers = ?, change_seq = ? WHERE id = ?",
        E::TABLE
    );
    sqlx::query(&sql)
        .bind(finalizers.to_json())
        .bind(seq)
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
