//! Global change sequence
//!
//! A single counter row shared by every reconciled table. Each mutation
//! allocates the next value inside its own transaction and stamps it onto the
//! row's `change_seq` column, so control loops can discover work with a range
//! scan above the highest value they already consumed.

use dboxed_types::ids::EntityId;
use sqlx::{Row, SqliteConnection};

use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};

/// Allocate the next value of the global change sequence.
pub async fn next_change_seq(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let seq: i64 =
        sqlx::query_scalar("UPDATE change_tracking SET seq = seq + 1 WHERE id = 1 RETURNING seq")
            .fetch_one(&mut *conn)
            .await?;
    Ok(seq)
}

/// Stamp a fresh sequence value onto a row so its control loop sees it again.
pub async fn bump<E: Entity>(conn: &mut SqliteConnection, id: E::Id) -> StorageResult<i64> {
    let seq = next_change_seq(conn).await?;
    let sql = format!("UPDATE {} SET change_seq = ? WHERE id = ?", E::TABLE);
    let result = sqlx::query(&sql)
        .bind(seq)
        .bind(id.to_db())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found(format!("{} {}", E::KIND, id)));
    }
    Ok(seq)
}

/// Ids changed after `since`, ordered by their change sequence.
pub async fn find_changes<E: Entity>(
    conn: &mut SqliteConnection,
    since: i64,
) -> StorageResult<Vec<(E::Id, i64)>> {
    let sql = format!(
        "SELECT id, change_seq FROM {} WHERE change_seq > ? ORDER BY change_seq",
        E::TABLE
    );
    let rows = sqlx::query(&sql).bind(since).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| {
            let id = crate::entity::read_id::<E::Id>(row, "id")?;
            let seq: i64 = row.try_get("change_seq")?;
            Ok((id, seq))
        })
        .collect()
}

/// Highest sequence value present in the table, 0 when empty.
pub async fn max_change_seq<E: Entity>(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let sql = format!("SELECT COALESCE(MAX(change_seq), 0) FROM {}", E::TABLE);
    let seq: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(seq)
}

/// Every id of the table, soft-deleted rows included.
pub async fn list_ids<E: Entity>(conn: &mut SqliteConnection) -> StorageResult<Vec<E::Id>> {
    let sql = format!("SELECT id FROM {} ORDER BY change_seq", E::TABLE);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| crate::entity::read_id::<E::Id>(row, "id"))
        .collect()
}
