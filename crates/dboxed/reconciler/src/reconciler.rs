//! Reconciler strategy trait

use async_trait::async_trait;
use dboxed_store::{Entity, StorageResult};

use crate::result::ReconcileResult;

/// Business logic for one entity kind, driven by a
/// [`ReconcileLoop`](crate::ReconcileLoop).
///
/// `reconcile` is called repeatedly for the same item and concurrently for
/// different items; it opens its own transactions and must converge when
/// run again on the state it left behind.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Item: Entity;

    /// Load the current row. `None` means it vanished and the work item is
    /// dropped.
    async fn get_item(&self, id: <Self::Item as Entity>::Id) -> StorageResult<Option<Self::Item>>;

    /// Drive the actual state of one item toward its declared state.
    async fn reconcile(&self, item: &Self::Item) -> ReconcileResult;
}
