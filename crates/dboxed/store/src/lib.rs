//! # dboxed-store
//!
//! Relational entity store for the dboxed control plane.
//!
//! Every reconciled table carries the same bookkeeping columns: a reconcile
//! status with details, a `change_seq` stamped from one global counter, a
//! nullable `deleted_at` and a finalizer set. On top of that this crate
//! provides:
//!
//! - [`Store`]: pool handle, schema setup and transactions
//! - [`querier`]: generic row queries from a column/value [`Filter`]
//! - [`change_tracking`]: the global change sequence and discovery queries
//! - [`soft_delete`]: soft delete, finalizers and the savepoint delete probe
//! - [`repos`]: resource specific repositories

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod change_tracking;
pub mod entity;
pub mod error;
pub mod querier;
pub mod repos;
mod schema;
pub mod soft_delete;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use entity::{Entity, Record};
pub use error::{StorageError, StorageResult};
pub use querier::{Filter, SqlValue};
pub use repos::replica_sets::ReplicaSetId;
pub use soft_delete::DeleteProbe;
pub use store::{Store, StoreOptions};
