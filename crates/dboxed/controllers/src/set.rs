//! Wiring of every reconcile loop

use std::sync::Arc;

use dboxed_reconciler::{LoopConfig, ReconcileLoop, Reconciler};
use dboxed_store::Store;
use dboxed_types::models::{DboxedSpec, GitSpec};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::boxes::BoxReconciler;
use crate::networks::NetworkReconciler;
use crate::replica_set::{IngressProxyReconciler, LoadBalancerReconciler};
use crate::spec::{SourceFetcher, SpecReconciler};
use crate::volumes::VolumeReconciler;

/// Names of the loops started by [`ControllerSet::spawn`]
pub const LOOP_NAMES: [&str; 7] = [
    "networks",
    "boxes",
    "volumes",
    "load-balancers",
    "ingress-proxies",
    "dboxed-specs",
    "git-specs",
];

/// A running reconcile loop
pub struct RunningLoop {
    pub name: String,
    pub handle: JoinHandle<()>,
}

/// All controllers of the control plane, sharing one store and one set of
/// loop settings.
pub struct ControllerSet {
    store: Store,
    defaults: LoopConfig,
    fetcher: Arc<dyn SourceFetcher>,
}

impl ControllerSet {
    pub fn new(store: Store, defaults: LoopConfig, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            store,
            defaults,
            fetcher,
        }
    }

    /// Start one loop per reconciled kind. Every loop stops when `shutdown`
    /// turns true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<RunningLoop> {
        let store = &self.store;
        let mut running = Vec::with_capacity(LOOP_NAMES.len());

        running.push(self.start("networks", NetworkReconciler::new(store.clone()), &shutdown));
        running.push(self.start("boxes", BoxReconciler::new(store.clone()), &shutdown));
        running.push(self.start("volumes", VolumeReconciler::new(store.clone()), &shutdown));
        running.push(self.start(
            "load-balancers",
            LoadBalancerReconciler::new(store.clone()),
            &shutdown,
        ));
        running.push(self.start(
            "ingress-proxies",
            IngressProxyReconciler::new(store.clone()),
            &shutdown,
        ));
        running.push(self.start(
            "dboxed-specs",
            SpecReconciler::<DboxedSpec>::new(store.clone(), self.fetcher.clone()),
            &shutdown,
        ));
        running.push(self.start(
            "git-specs",
            SpecReconciler::<GitSpec>::new(store.clone(), self.fetcher.clone()),
            &shutdown,
        ));

        info!(loops = running.len(), "Controllers started");
        running
    }

    fn start<R: Reconciler>(
        &self,
        name: &str,
        reconciler: R,
        shutdown: &watch::Receiver<bool>,
    ) -> RunningLoop {
        let config = LoopConfig {
            reconciler_name: name.to_string(),
            ..self.defaults.clone()
        };
        let handle =
            ReconcileLoop::new(config, self.store.clone(), reconciler).spawn(shutdown.clone());
        RunningLoop {
            name: name.to_string(),
            handle,
        }
    }
}
