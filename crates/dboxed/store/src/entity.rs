//! Row mapping traits
//!
//! [`Record`] maps any table row to a model. [`Entity`] narrows that to
//! reconciled rows, which carry an id and the shared [`ObjectMeta`] columns
//! and can therefore be driven by the generic change-tracking, soft-delete
//! and control-loop machinery.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use dboxed_types::ids::{parse_id, EntityId};
use dboxed_types::models::UnknownVariant;
use dboxed_types::status::{Finalizers, ObjectMeta, ReconcileStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{StorageError, StorageResult};

/// A model stored in one table
pub trait Record: Sized + Send + Unpin + 'static {
    const TABLE: &'static str;

    fn from_row(row: &SqliteRow) -> StorageResult<Self>;
}

/// A reconciled model: identified, change-tracked and soft-deletable
pub trait Entity: Record + Clone + Sync {
    type Id: EntityId;

    /// Human readable kind used in logs and error messages
    const KIND: &'static str;

    fn id(&self) -> Self::Id;

    fn meta(&self) -> &ObjectMeta;
}

pub(crate) fn read_id<I: EntityId>(row: &SqliteRow, column: &str) -> StorageResult<I> {
    let raw: String = row.try_get(column)?;
    Ok(parse_id(&raw)?)
}

pub(crate) fn read_opt_id<I: EntityId>(row: &SqliteRow, column: &str) -> StorageResult<Option<I>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_id(&raw).map_err(StorageError::from))
        .transpose()
}

pub(crate) fn read_enum<T>(row: &SqliteRow, column: &str) -> StorageResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse()?)
}

pub(crate) fn read_meta(row: &SqliteRow) -> StorageResult<ObjectMeta> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let deleted_at: Option<DateTime<Utc>> = row.try_get("deleted_at")?;
    let finalizers: String = row.try_get("finalizers")?;
    let status: String = row.try_get("reconcile_status")?;

    Ok(ObjectMeta {
        created_at,
        deleted_at,
        finalizers: Finalizers::from_json(&finalizers)?,
        change_seq: row.try_get("change_seq")?,
        status: ReconcileStatus::from(status),
        status_details: row.try_get("reconcile_status_details")?,
    })
}
