//! dboxed daemon - infrastructure control plane
//!
//! Runs one reconcile loop per resource kind against the shared SQL store:
//! networks, boxes, volumes, load balancers, ingress proxies and the two
//! declarative spec sources.

use clap::Parser;
use dboxed_daemon::{shutdown_signal, DaemonConfig, DaemonResult, Supervisor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dboxed daemon CLI
#[derive(Parser)]
#[command(name = "dboxedd")]
#[command(about = "dboxed control plane daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DBOXED_CONFIG")]
    config: Option<String>,

    /// Database URL, overrides `storage.url`
    #[arg(long, env = "DBOXED_DATABASE_URL")]
    database_url: Option<String>,

    /// Directory holding spec source repositories, overrides `sources.root`
    #[arg(long, env = "DBOXED_SOURCES_ROOT")]
    sources_root: Option<String>,

    /// Log level, overrides `logging.level`
    #[arg(long, env = "DBOXED_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DBOXED_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(url) = cli.database_url {
        config.storage.url = url;
    }
    if let Some(root) = cli.sources_root {
        config.sources.root = root.into();
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = %config.storage.url,
        parallel = config.reconciler.parallel,
        "Starting dboxedd"
    );

    Supervisor::new(config).run(shutdown_signal()).await
}
