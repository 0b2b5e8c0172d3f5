mod config;
mod error;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine::services::client::PdsClientFactory;
use engine::services::session::MemorySessionStore;
use engine::MigrationOrchestrator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, WebConfig};

/// Account migration service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file. Missing file means defaults.
    #[arg(long, default_value = "migration.toml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(long, env = "MIGRATION_BIND")]
    bind: Option<String>,

    /// Start with migrations switched off
    #[arg(long, env = "MIGRATION_DISABLED")]
    disabled: bool,
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = WebConfig::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if cli.disabled {
        config.migration.migration_enabled = false;
    }

    init_logging(&config.logging);
    config
        .migration
        .validate()
        .context("Invalid migration configuration")?;

    let factory = PdsClientFactory::new(&config.migration.http)
        .context("Failed to build HTTP client")?;
    let orchestrator = Arc::new(MigrationOrchestrator::new(
        config.migration.clone(),
        Arc::new(factory),
        Arc::new(MemorySessionStore::new()),
    ));
    if !orchestrator.is_enabled() {
        warn!("Starting with migrations disabled");
    }

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Migration service listening on {}", addr);

    axum::serve(listener, routes::router(orchestrator))
        .await
        .context("Server error")?;
    Ok(())
}
