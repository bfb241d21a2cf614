//! Configuration for dboxed-daemon
//!
//! Sources are layered: built-in defaults, then an optional config file, then
//! `DBOXED_` environment variables where `__` separates nested keys, e.g.
//! `DBOXED_RECONCILER__PARALLEL=8`.

use std::path::PathBuf;
use std::time::Duration;

use dboxed_reconciler::LoopConfig;
use dboxed_store::StoreOptions;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite connection URL
    #[serde(default = "default_storage_url")]
    pub url: String,

    /// Maximum connections in pool
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,

    /// Connection and busy timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            max_connections: default_pool_size(),
            connect_timeout_secs: default_connection_timeout(),
        }
    }
}

/// Settings shared by every reconcile loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_change_check_interval")]
    pub change_check_interval_ms: u64,

    #[serde(default = "default_error_retry_interval")]
    pub error_retry_interval_secs: u64,

    /// Zero disables periodic full reconciles
    #[serde(default)]
    pub full_reconcile_interval_secs: u64,

    #[serde(default = "default_requeue_delay")]
    pub requeue_delay_ms: u64,

    /// Workers per loop
    #[serde(default = "default_parallel")]
    pub parallel: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            change_check_interval_ms: default_change_check_interval(),
            error_retry_interval_secs: default_error_retry_interval(),
            full_reconcile_interval_secs: 0,
            requeue_delay_ms: default_requeue_delay(),
            parallel: default_parallel(),
        }
    }
}

/// Where spec documents are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directory holding checked-out repositories
    #[serde(default = "default_sources_root")]
    pub root: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_sources_root(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_storage_url() -> String {
    "sqlite://dboxed.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_change_check_interval() -> u64 {
    1000
}

fn default_error_retry_interval() -> u64 {
    15
}

fn default_requeue_delay() -> u64 {
    250
}

fn default_parallel() -> usize {
    4
}

fn default_sources_root() -> PathBuf {
    PathBuf::from("sources")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `DBOXED_` environment variables
pub fn environment() -> config::Environment {
    config::Environment::with_prefix("DBOXED")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl DaemonConfig {
    /// Load configuration from defaults, `path` and the process environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_layered(path, environment())
    }

    /// Load configuration with an explicit environment source
    pub fn load_layered(
        path: Option<&str>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(env);

        builder.build()?.try_deserialize()
    }

    /// Loop settings shared by all controllers; each loop sets its own name.
    pub fn to_loop_config(&self) -> LoopConfig {
        let r = &self.reconciler;
        LoopConfig::new("dboxed")
            .with_change_check_interval(Duration::from_millis(r.change_check_interval_ms))
            .with_error_retry_interval(Duration::from_secs(r.error_retry_interval_secs))
            .with_full_reconcile_interval(Duration::from_secs(r.full_reconcile_interval_secs))
            .with_requeue_delay(Duration::from_millis(r.requeue_delay_ms))
            .with_parallel(r.parallel)
    }

    pub fn to_store_options(&self) -> StoreOptions {
        StoreOptions {
            url: self.storage.url.clone(),
            max_connections: self.storage.max_connections,
            connect_timeout: Duration::from_secs(self.storage.connect_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.storage.url, "sqlite://dboxed.db");
        assert_eq!(config.reconciler.parallel, 4);
        assert_eq!(config.reconciler.full_reconcile_interval_secs, 0);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_loop_config_conversion() {
        let loop_config = DaemonConfig::default().to_loop_config();
        assert_eq!(loop_config.change_check_interval, Duration::from_secs(1));
        assert_eq!(loop_config.error_retry_interval, Duration::from_secs(15));
        assert_eq!(loop_config.requeue_delay, Duration::from_millis(250));
        assert!(loop_config.full_reconcile_interval.is_zero());
        assert_eq!(loop_config.parallel, 4);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "storage:\n  url: \"sqlite::memory:\"\nreconciler:\n  requeue_delay_ms: 50\nsources:\n  root: /srv/specs\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = DaemonConfig::load_layered(Some(path), env_from(&[])).unwrap();
        assert_eq!(config.storage.url, "sqlite::memory:");
        assert_eq!(config.storage.max_connections, 8);
        assert_eq!(config.reconciler.requeue_delay_ms, 50);
        assert_eq!(config.sources.root, PathBuf::from("/srv/specs"));
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let env = env_from(&[
            ("DBOXED_RECONCILER__PARALLEL", "8"),
            ("DBOXED_LOGGING__JSON", "true"),
        ]);
        let config = DaemonConfig::load_layered(None, env).unwrap();
        assert_eq!(config.reconciler.parallel, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = DaemonConfig::load_layered(Some("/nonexistent/dboxed.yaml"), env_from(&[]));
        assert!(result.is_err());
    }
}
