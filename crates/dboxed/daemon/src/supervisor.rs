//! Control plane lifecycle

use std::future::Future;
use std::sync::Arc;

use dboxed_controllers::{ControllerSet, DirectoryFetcher};
use dboxed_store::Store;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};

/// Runs every reconcile loop until a shutdown signal arrives
pub struct Supervisor {
    config: DaemonConfig,
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Open the store, start the loops and wait for `shutdown`. All loops are
    /// joined before this returns.
    pub async fn run<F>(self, shutdown: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        let store = Store::connect(&self.config.to_store_options()).await?;
        let fetcher = Arc::new(DirectoryFetcher::new(self.config.sources.root.clone()));

        let (stop_tx, stop_rx) = watch::channel(false);
        let loops =
            ControllerSet::new(store.clone(), self.config.to_loop_config(), fetcher).spawn(stop_rx);
        info!(
            loops = loops.len(),
            sources = %self.config.sources.root.display(),
            "dboxed control plane running"
        );

        shutdown.await;
        info!("dboxed control plane shutting down");
        if stop_tx.send(true).is_err() {
            warn!("All reconcile loops already stopped");
        }

        let mut failed = None;
        for running in loops {
            if let Err(e) = running.handle.await {
                error!(reconciler = %running.name, error = %e, "Reconcile loop failed");
                failed.get_or_insert(DaemonError::Loop {
                    name: running.name,
                    reason: e.to_string(),
                });
            }
        }
        store.close().await;

        match failed {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn memory_config(root: &std::path::Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.storage.url = "sqlite::memory:".to_string();
        config.sources.root = root.to_path_buf();
        config.reconciler.change_check_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(memory_config(dir.path()));
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            supervisor.run(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config(dir.path());
        config.storage.url = format!("sqlite://{}/missing/dir/dboxed.db", dir.path().display());
        config.storage.connect_timeout_secs = 1;

        let result = Supervisor::new(config).run(async {}).await;
        assert!(matches!(result, Err(DaemonError::Storage(_))));
    }
}
