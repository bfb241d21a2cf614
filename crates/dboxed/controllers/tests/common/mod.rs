#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dboxed_controllers::networks::FINALIZER as NETWORK_FINALIZER;
use dboxed_controllers::spec::SourceLocation;
use dboxed_controllers::{ControllerSet, InMemoryFetcher, RunningLoop};
use dboxed_reconciler::LoopConfig;
use dboxed_store::repos::{networks, workspaces};
use dboxed_store::Store;
use dboxed_types::models::{Network, Workspace};
use tokio::sync::watch;

pub const REPO: &str = "https://git.example.com/acme/infra.git";

/// Poll `$check` (an expression that may `.await`) until it is true.
macro_rules! wait_until {
    ($what:expr, $check:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            if $check {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                $what
            );
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }};
}

pub struct Harness {
    pub store: Store,
    pub workspace: Workspace,
    pub network: Network,
    pub fetcher: Arc<InMemoryFetcher>,
    shutdown: watch::Sender<bool>,
    loops: Vec<RunningLoop>,
}

pub fn fast_loop_config() -> LoopConfig {
    LoopConfig::default()
        .with_change_check_interval(Duration::from_millis(20))
        .with_requeue_delay(Duration::from_millis(20))
        .with_error_retry_interval(Duration::from_millis(200))
        .with_parallel(2)
}

impl Harness {
    pub async fn start() -> Self {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        let workspace = workspaces::create_workspace(&mut conn, "acme").await.unwrap();
        let network = networks::create_network(&mut conn, workspace.id, "default")
            .await
            .unwrap();
        drop(conn);

        let fetcher = Arc::new(InMemoryFetcher::new());
        let (shutdown, rx) = watch::channel(false);
        let loops =
            ControllerSet::new(store.clone(), fast_loop_config(), fetcher.clone()).spawn(rx);

        wait_until!(
            "network finalizer",
            store
                .get::<Network>(network.id)
                .await
                .unwrap()
                .is_some_and(|n| n.meta.finalizers.contains(NETWORK_FINALIZER))
        );

        Self {
            store,
            workspace,
            network,
            fetcher,
            shutdown,
            loops,
        }
    }

    pub async fn publish(&self, reference: &str, path: &str, document: &str) {
        self.fetcher
            .insert(SourceLocation::new(REPO, reference, path), document)
            .await;
    }

    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        for running in self.loops {
            tokio::time::timeout(Duration::from_secs(10), running.handle)
                .await
                .unwrap_or_else(|_| panic!("loop {} did not stop", running.name))
                .unwrap();
        }
        self.store.close().await;
    }
}
