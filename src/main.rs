use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use release_watchbot::config;
use release_watchbot::db::SqliteStore;
use release_watchbot::notify::Dispatcher;
use release_watchbot::poller;
use release_watchbot::provider::HttpProviderClient;
use release_watchbot::Watcher;

#[derive(Debug, Parser)]
#[command(author, version, about = "Watch GitHub and Codeberg repositories for new releases")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    cfg.apply_env();
    cfg.ensure_dirs()?;

    let store = Arc::new(SqliteStore::open(&cfg.database_url()).await?);
    let api = Arc::new(HttpProviderClient::from_config(&cfg)?);
    let dispatcher = Dispatcher::from_config(&cfg)?;
    info!(channels = ?dispatcher.channels(), "notification channels ready");

    let watcher = Watcher::new(store.clone(), store, api, dispatcher);
    let handle = poller::global().start(watcher, cfg.app.mode);
    info!(mode = ?cfg.app.mode, polling = handle.is_some(), "release watcher started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    if let Some(handle) = handle {
        handle.abort();
    }
    Ok(())
}
