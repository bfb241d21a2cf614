//! Change-driven reconcile loop
//!
//! One discovery task polls the change sequence of the reconciled table and
//! feeds changed ids into a [`WorkQueue`]; `parallel` workers drain it, call
//! the [`Reconciler`] and persist the outcome as the row status.

use std::sync::Arc;
use std::time::Duration;

use dboxed_store::{Entity, StorageResult, Store};
use dboxed_types::status::ReconcileStatus;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoopConfig;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::result::ReconcileResult;

type ItemId<R> = <<R as Reconciler>::Item as Entity>::Id;

struct LoopInner<R: Reconciler> {
    config: LoopConfig,
    store: Store,
    reconciler: R,
    queue: Arc<WorkQueue<ItemId<R>>>,
}

/// Control loop for one entity kind
pub struct ReconcileLoop<R: Reconciler> {
    inner: Arc<LoopInner<R>>,
}

impl<R: Reconciler> ReconcileLoop<R> {
    pub fn new(config: LoopConfig, store: Store, reconciler: R) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                config,
                store,
                reconciler,
                queue: Arc::new(WorkQueue::new()),
            }),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Queue of this loop; adding an id triggers a reconcile of it.
    pub fn queue(&self) -> Arc<WorkQueue<ItemId<R>>> {
        self.inner.queue.clone()
    }

    /// Run on a new task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run discovery and workers until `shutdown` turns true (or its sender
    /// is dropped), then wait for in-flight cycles to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let inner = self.inner;
        let parallel = inner.config.parallel.max(1);
        info!(
            reconciler = %inner.config.reconciler_name,
            parallel,
            "Starting reconcile loop"
        );

        let workers: Vec<_> = (0..parallel)
            .map(|_| {
                let inner = inner.clone();
                tokio::spawn(async move { inner.work().await })
            })
            .collect();

        inner.discover(&mut shutdown).await;
        inner.queue.shut_down().await;

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(
                    reconciler = %inner.config.reconciler_name,
                    error = %e,
                    "Worker task failed"
                );
            }
        }

        info!(reconciler = %inner.config.reconciler_name, "Reconcile loop stopped");
    }
}

impl<R: Reconciler> LoopInner<R> {
    async fn discover(&self, shutdown: &mut watch::Receiver<bool>) {
        let period = self.config.change_check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watermark: Option<i64> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let discovered = match watermark {
                None => self.cold_start().await,
                Some(since) => self.poll_changes(since).await,
            };
            match discovered {
                Ok(next) => watermark = Some(next),
                Err(e) => {
                    warn!(
                        reconciler = %self.config.reconciler_name,
                        error = %e,
                        "Change discovery failed, skipping tick"
                    );
                }
            }
        }
    }

    /// Enqueue every row. The watermark is read first so that nothing
    /// written while listing is missed.
    async fn cold_start(&self) -> StorageResult<i64> {
        let watermark = self.store.max_change_seq::<R::Item>().await?;
        let ids = self.store.list_ids::<R::Item>().await?;
        debug!(
            reconciler = %self.config.reconciler_name,
            count = ids.len(),
            watermark,
            "Initial reconcile of all items"
        );
        for id in ids {
            self.queue.add(id).await;
        }
        Ok(watermark)
    }

    async fn poll_changes(&self, since: i64) -> StorageResult<i64> {
        let changes = self.store.find_changes::<R::Item>(since).await?;
        let mut watermark = since;
        for (id, seq) in changes {
            watermark = watermark.max(seq);
            self.queue.add(id).await;
        }
        Ok(watermark)
    }

    async fn work(&self) {
        while let Some(id) = self.queue.get().await {
            self.process(id).await;
            self.queue.done(&id).await;
        }
    }

    #[instrument(skip(self, id), fields(reconciler = %self.config.reconciler_name, id = %id))]
    async fn process(&self, id: ItemId<R>) {
        let item = match self.reconciler.get_item(id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!("Item no longer exists, dropping");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load item");
                self.queue.add_after(id, self.config.error_retry_interval).await;
                return;
            }
        };

        let result = self.reconciler.reconcile(&item).await;
        self.finish(&item, result).await;
    }

    async fn finish(&self, item: &R::Item, result: ReconcileResult) {
        let id = item.id();

        if result.requeue {
            debug!(message = %result.user_message, "Requeue requested");
            if let Some(status) = &result.status {
                self.write_status(item, status, &result.user_message).await;
            }
            self.queue.add_after(id, self.config.requeue_delay).await;
            return;
        }

        if let Some(err) = &result.error {
            warn!(error = %err, "Reconcile failed");
            self.write_status(item, &ReconcileStatus::Error, &result.user_message)
                .await;
            self.queue.add_after(id, self.config.error_retry_interval).await;
            return;
        }

        if item.meta().is_deleted() {
            match self.store.hard_delete_finalized::<R::Item>(id).await {
                Ok(true) => {
                    info!("Deleted");
                    return;
                }
                // Finalizers remain; their owners bump the row when done
                Ok(false) => {}
                Err(e) => {
                    let message = format!("Hard delete failed: {e}");
                    warn!(error = %e, "Hard delete failed");
                    self.write_status(item, &ReconcileStatus::Error, &message).await;
                    self.queue.add_after(id, self.config.error_retry_interval).await;
                    return;
                }
            }
        }

        self.write_status(item, &result.effective_status(), &result.user_message)
            .await;
        if !self.config.full_reconcile_interval.is_zero() {
            self.queue
                .add_after(id, self.config.full_reconcile_interval)
                .await;
        }
    }

    async fn write_status(&self, item: &R::Item, status: &ReconcileStatus, details: &str) {
        let meta = item.meta();
        if meta.status == *status && meta.status_details == details {
            return;
        }
        if let Err(e) = self
            .store
            .set_status::<R::Item>(item.id(), status, details)
            .await
        {
            warn!(error = %e, "Failed to write status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use async_trait::async_trait;
    use dboxed_store::repos::{networks, workspaces};
    use dboxed_store::soft_delete;
    use dboxed_types::ids::NetworkId;
    use dboxed_types::models::{Network, Workspace};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const FINALIZER: &str = "test-finalizer";

    struct FakeReconciler {
        store: Store,
        calls: Arc<Mutex<Vec<Instant>>>,
        failures_left: Arc<AtomicU32>,
        waits_left: Arc<AtomicU32>,
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl Reconciler for FakeReconciler {
        type Item = Network;

        async fn get_item(&self, id: NetworkId) -> StorageResult<Option<Network>> {
            self.store.get::<Network>(id).await
        }

        async fn reconcile(&self, item: &Network) -> ReconcileResult {
            self.calls.lock().unwrap().push(Instant::now());
            if take_one(&self.failures_left) {
                return ReconcileResult::error(ReconcileError::internal("injected failure"));
            }
            if take_one(&self.waits_left) {
                return ReconcileResult::requeue_with_status(
                    ReconcileStatus::deleting(),
                    "waiting for dependents",
                );
            }
            if item.meta.is_deleted() {
                let mut conn = match self.store.acquire().await {
                    Ok(conn) => conn,
                    Err(e) => return ReconcileResult::error(e.into()),
                };
                if let Err(e) =
                    soft_delete::remove_finalizer::<Network>(&mut conn, item.id, FINALIZER).await
                {
                    return ReconcileResult::error(e.into());
                }
            }
            ReconcileResult::ok()
        }
    }

    struct Harness {
        store: Store,
        workspace: Workspace,
        calls: Arc<Mutex<Vec<Instant>>>,
        failures_left: Arc<AtomicU32>,
        waits_left: Arc<AtomicU32>,
    }

    impl Harness {
        async fn new() -> Self {
            let store = Store::in_memory().await.unwrap();
            let mut conn = store.acquire().await.unwrap();
            let workspace = workspaces::create_workspace(&mut conn, "test").await.unwrap();
            drop(conn);
            Self {
                store,
                workspace,
                calls: Arc::new(Mutex::new(Vec::new())),
                failures_left: Arc::new(AtomicU32::new(0)),
                waits_left: Arc::new(AtomicU32::new(0)),
            }
        }

        async fn create_network(&self, name: &str) -> Network {
            let mut conn = self.store.acquire().await.unwrap();
            networks::create_network(&mut conn, self.workspace.id, name)
                .await
                .unwrap()
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }

        fn start(&self, error_retry: Duration) -> (watch::Sender<bool>, JoinHandle<()>) {
            let config = LoopConfig::new("networks-test")
                .with_change_check_interval(Duration::from_millis(20))
                .with_error_retry_interval(error_retry)
                .with_requeue_delay(Duration::from_millis(100))
                .with_parallel(2);
            let reconciler = FakeReconciler {
                store: self.store.clone(),
                calls: self.calls.clone(),
                failures_left: self.failures_left.clone(),
                waits_left: self.waits_left.clone(),
            };
            let (tx, rx) = watch::channel(false);
            let handle = ReconcileLoop::new(config, self.store.clone(), reconciler).spawn(rx);
            (tx, handle)
        }

        async fn wait_for_status(&self, id: NetworkId, status: ReconcileStatus) -> Network {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Some(network) = self.store.get::<Network>(id).await.unwrap() {
                    if network.meta.status == status {
                        return network;
                    }
                }
                assert!(Instant::now() < deadline, "status {status} not reached");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn wait_for_gone(&self, id: NetworkId) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.store.get::<Network>(id).await.unwrap().is_some() {
                assert!(Instant::now() < deadline, "row was not hard-deleted");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    async fn stop(tx: watch::Sender<bool>, handle: JoinHandle<()>) {
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cold_start_reconciles_existing_rows() {
        let harness = Harness::new().await;
        let a = harness.create_network("a").await;
        let b = harness.create_network("b").await;
        assert_eq!(a.meta.status, ReconcileStatus::pending());

        let (tx, handle) = harness.start(Duration::from_secs(15));
        harness.wait_for_status(a.id, ReconcileStatus::Ok).await;
        harness.wait_for_status(b.id, ReconcileStatus::Ok).await;
        stop(tx, handle).await;

        assert_eq!(harness.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_new_rows_are_discovered_by_change_sequence() {
        let harness = Harness::new().await;
        let (tx, handle) = harness.start(Duration::from_secs(15));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let network = harness.create_network("late").await;
        harness.wait_for_status(network.id, ReconcileStatus::Ok).await;
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_failed_reconcile_sets_error_and_retries() {
        let harness = Harness::new().await;
        harness.failures_left.store(1, Ordering::SeqCst);
        let network = harness.create_network("flaky").await;

        let retry = Duration::from_millis(300);
        let (tx, handle) = harness.start(retry);
        let failed = harness
            .wait_for_status(network.id, ReconcileStatus::Error)
            .await;
        assert!(failed.meta.status_details.contains("injected failure"));

        let recovered = harness.wait_for_status(network.id, ReconcileStatus::Ok).await;
        assert!(recovered.meta.status_details.is_empty());
        stop(tx, handle).await;

        let calls = harness.calls();
        assert_eq!(calls.len(), 2);
        let waited = calls[1] - calls[0];
        assert!(waited >= retry, "retried after {waited:?}");
        // Status writes do not count as changes
        assert_eq!(recovered.meta.change_seq, network.meta.change_seq);
    }

    #[tokio::test]
    async fn test_requeue_surfaces_waiting_status() {
        let harness = Harness::new().await;
        harness.waits_left.store(2, Ordering::SeqCst);
        let network = harness.create_network("waiting").await;

        let (tx, handle) = harness.start(Duration::from_secs(15));
        let waiting = harness
            .wait_for_status(network.id, ReconcileStatus::deleting())
            .await;
        assert_eq!(waiting.meta.status_details, "waiting for dependents");

        let done = harness.wait_for_status(network.id, ReconcileStatus::Ok).await;
        assert!(done.meta.status_details.is_empty());
        stop(tx, handle).await;

        // Requeues are not error retries
        let calls = harness.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2] - calls[0] < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_deleted_row_is_removed_once_finalized() {
        let harness = Harness::new().await;
        let network = harness.create_network("doomed").await;
        {
            let mut conn = harness.store.acquire().await.unwrap();
            soft_delete::add_finalizer::<Network>(&mut conn, network.id, FINALIZER)
                .await
                .unwrap();
        }

        let (tx, handle) = harness.start(Duration::from_secs(15));
        harness.wait_for_status(network.id, ReconcileStatus::Ok).await;

        {
            let mut conn = harness.store.acquire().await.unwrap();
            assert!(soft_delete::soft_delete::<Network>(&mut conn, network.id)
                .await
                .unwrap());
        }
        harness.wait_for_gone(network.id).await;
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_run_returns_when_shutdown_sender_dropped() {
        let harness = Harness::new().await;
        let (tx, handle) = harness.start(Duration::from_secs(15));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
