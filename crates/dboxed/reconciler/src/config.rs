//! Loop configuration

use std::time::Duration;

/// Timing and concurrency of one reconcile loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name used in logs
    pub reconciler_name: String,
    /// How often to look for changed rows
    pub change_check_interval: Duration,
    /// Periodic re-reconcile of every successful item; zero disables it
    pub full_reconcile_interval: Duration,
    /// Delay before retrying a failed item
    pub error_retry_interval: Duration,
    /// Delay before running an item again that asked to be requeued
    pub requeue_delay: Duration,
    /// Number of workers
    pub parallel: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            reconciler_name: "reconciler".to_string(),
            change_check_interval: Duration::from_secs(1),
            full_reconcile_interval: Duration::ZERO,
            error_retry_interval: Duration::from_secs(15),
            requeue_delay: Duration::from_millis(250),
            parallel: 4,
        }
    }
}

impl LoopConfig {
    pub fn new(reconciler_name: impl Into<String>) -> Self {
        Self {
            reconciler_name: reconciler_name.into(),
            ..Self::default()
        }
    }

    pub fn with_change_check_interval(mut self, interval: Duration) -> Self {
        self.change_check_interval = interval;
        self
    }

    pub fn with_full_reconcile_interval(mut self, interval: Duration) -> Self {
        self.full_reconcile_interval = interval;
        self
    }

    pub fn with_error_retry_interval(mut self, interval: Duration) -> Self {
        self.error_retry_interval = interval;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }
}
