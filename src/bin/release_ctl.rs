use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use release_watchbot::config;
use release_watchbot::db::SqliteStore;
use release_watchbot::fetcher::FetchOptions;
use release_watchbot::model::{JobStatus, RepoSettings, Repository};
use release_watchbot::notify::{Channel, Dispatcher};
use release_watchbot::provider::HttpProviderClient;
use release_watchbot::settings::Settings;
use release_watchbot::Watcher;

#[derive(Debug, Parser)]
#[command(author, version, about = "One-shot release watcher commands")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check every repository and send notifications for new releases
    Check {
        /// Ignore the cache interval and stored ETags
        #[arg(long)]
        skip_cache: bool,
    },
    /// Check one repository now
    Refresh { id: String },
    /// Track repositories by URL, provider:owner/name, or owner/name.
    /// Waits for the baseline check of the new entries.
    Add {
        #[arg(required = true)]
        repos: Vec<String>,
    },
    /// Merge repositories from a JSON export; waits like `add`
    Import { file: PathBuf },
    /// List providers hosting owner/name
    Resolve { repo: String },
    /// Acknowledge a new release
    Ack {
        id: Option<String>,
        /// Acknowledge every repository
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Stop tracking a repository
    Remove { id: String },
    /// Print tracked repositories as JSON
    List,
    /// Print settings, or replace them from a JSON file
    Settings {
        #[arg(long)]
        set: Option<PathBuf>,
    },
    /// Replace one repository's filter overrides from a JSON file
    RepoSettings { id: String, file: PathBuf },
    /// Send the sample release through the configured channels
    TestNotify {
        #[arg(long)]
        channel: Option<Channel>,
        /// Email recipient overriding the configured one
        #[arg(long)]
        recipient: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

async fn wait_for_job(watcher: &Watcher, job_id: &str) -> Result<()> {
    match watcher.wait_for_job(job_id, Duration::from_millis(200)).await {
        Some(JobStatus::Complete) => {
            info!(job_id, "background refresh complete");
            Ok(())
        }
        Some(JobStatus::Error) => bail!("background refresh {job_id} reported errors"),
        Some(JobStatus::Pending) | None => bail!("background refresh {job_id} expired"),
    }
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
    let watcher = Watcher::new(store.clone(), store, api, dispatcher);

    match args.command {
        Command::Check { skip_cache } => {
            let summary = watcher
                .check_for_new_releases(FetchOptions { skip_cache })
                .await?;
            println!("{}", summary.describe(watcher.translator()));
            print_json(&summary)?;
        }
        Command::Refresh { id } => {
            let summary = watcher.refresh_repository(&id).await?;
            print_json(&summary)?;
        }
        // The baseline refresh runs on this process's runtime, so it has to
        // finish before main returns.
        Command::Add { repos } => {
            let summary = watcher.add_repositories(&repos).await?;
            print_json(&summary)?;
            if let Some(job_id) = summary.job_id.as_deref() {
                wait_for_job(&watcher, job_id).await?;
            }
        }
        Command::Import { file } => {
            let repos: Vec<Repository> = read_json(&file)?;
            let summary = watcher.import_repositories(repos).await?;
            print_json(&summary)?;
            if let Some(job_id) = summary.job_id.as_deref() {
                wait_for_job(&watcher, job_id).await?;
            }
        }
        Command::Resolve { repo } => {
            let candidates = watcher.resolve_repo_providers(&repo).await;
            if candidates.is_empty() {
                println!(
                    "{}",
                    watcher.translator().translate("resolve.none", &[("repo", &repo)])
                );
            } else {
                print_json(&candidates)?;
            }
        }
        Command::Ack { id, all } => match (id, all) {
            (_, true) => {
                let cleared = watcher.acknowledge_all().await?;
                println!("{cleared} releases acknowledged");
            }
            (Some(id), false) => watcher.acknowledge_release(&id).await?,
            (None, false) => bail!("pass a repository id or --all"),
        },
        Command::Remove { id } => watcher.remove_repository(&id).await?,
        Command::List => print_json(&watcher.list_repositories().await?)?,
        Command::Settings { set } => match set {
            Some(path) => {
                let next: Settings = read_json(&path)?;
                print_json(&watcher.update_settings(next).await?)?;
            }
            None => print_json(&watcher.settings().await?)?,
        },
        Command::RepoSettings { id, file } => {
            let overrides: RepoSettings = read_json(&file)?;
            watcher.update_repository_settings(&id, overrides).await?;
        }
        Command::TestNotify { channel, recipient } => {
            let report = watcher
                .send_test_notification(channel, recipient.as_deref())
                .await?;
            if report.delivered.is_empty() {
                println!("no notification channel configured");
            }
            for channel in report.delivered {
                println!("test notification sent via {channel}");
            }
        }
    }
    Ok(())
}
