use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::instrument;

use super::{RepositoryStore, SettingsStore};
use crate::model::Repository;
use crate::settings::Settings;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = if normalized.starts_with("sqlite::memory") {
        // Every in-memory connection is its own database.
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&normalized)
            .await?
    } else {
        let with_create = if normalized.contains('?') {
            format!("{normalized}&mode=rwc")
        } else {
            format!("{normalized}?mode=rwc")
        };
        SqlitePool::connect(&with_create).await?
    };
    if !normalized.starts_with("sqlite::memory") {
        // Enable WAL and stricter durability.
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=FULL;")
            .execute(&pool)
            .await?;
    }
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_repositories(pool: &Pool) -> Result<Vec<Repository>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, data FROM repositories ORDER BY position, id")
            .fetch_all(pool)
            .await
            .context("failed to read repositories")?;
    rows.into_iter()
        .map(|(id, data)| {
            serde_json::from_str::<Repository>(&data)
                .with_context(|| format!("corrupt repository row {id}"))
        })
        .collect()
}

/// Replace the stored list in one transaction.
#[instrument(skip_all, fields(count = repos.len()))]
pub async fn replace_repositories(pool: &Pool, repos: &[Repository]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM repositories")
        .execute(&mut *tx)
        .await?;
    for (position, repo) in repos.iter().enumerate() {
        let data = serde_json::to_string(repo)?;
        sqlx::query("INSERT INTO repositories (id, position, data) VALUES (?, ?, ?)")
            .bind(&repo.id)
            .bind(position as i64)
            .bind(data)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store repository {}", repo.id))?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_settings(pool: &Pool) -> Result<Option<Settings>> {
    let data: Option<String> = sqlx::query_scalar("SELECT data FROM settings WHERE id = 1")
        .fetch_optional(pool)
        .await
        .context("failed to read settings")?;
    data.map(|d| serde_json::from_str(&d).context("corrupt settings row"))
        .transpose()
}

#[instrument(skip_all)]
pub async fn store_settings(pool: &Pool, settings: &Settings) -> Result<()> {
    let data = serde_json::to_string(settings)?;
    sqlx::query(
        "INSERT INTO settings (id, data) VALUES (1, ?) \
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
    )
    .bind(data)
    .execute(pool)
    .await
    .context("failed to write settings")?;
    Ok(())
}

/// SQLite-backed repository and settings store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate the database at `database_url`.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RepositoryStore for SqliteStore {
    async fn get_repositories(&self) -> Result<Vec<Repository>> {
        load_repositories(&self.pool).await
    }

    async fn save_repositories(&self, repos: &[Repository]) -> Result<()> {
        replace_repositories(&self.pool, repos).await
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_settings(&self) -> Result<Settings> {
        Ok(load_settings(&self.pool).await?.unwrap_or_default())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        store_settings(&self.pool, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReleaseChannel;

    async fn setup_store() -> SqliteStore {
        SqliteStore::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn repositories_replace_whole_list_in_order() {
        let store = setup_store().await;
        assert!(store.get_repositories().await.unwrap().is_empty());

        let a = Repository::new("b/second", "https://github.com/b/second");
        let b = Repository::new("a/first", "https://github.com/a/first");
        store.save_repositories(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(store.get_repositories().await.unwrap(), vec![a.clone(), b]);

        store.save_repositories(&[a.clone()]).await.unwrap();
        assert_eq!(store.get_repositories().await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn duplicate_ids_fail_and_keep_previous_list() {
        let store = setup_store().await;
        let a = Repository::new("o/r", "https://github.com/o/r");
        store.save_repositories(&[a.clone()]).await.unwrap();

        let err = store
            .save_repositories(&[a.clone(), a.clone()])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to store repository o/r"));
        assert_eq!(store.get_repositories().await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn settings_default_then_upsert() {
        let store = setup_store().await;
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());

        let settings = Settings {
            refresh_interval: 60,
            release_channels: vec![ReleaseChannel::Stable, ReleaseChannel::Prerelease],
            ..Settings::default()
        };
        store.save_settings(&settings).await.unwrap();
        store.save_settings(&settings).await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), settings);
    }

    #[test]
    fn prepare_url_passes_memory_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn prepare_url_creates_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let db = td.path().join("nested/releases.db");
        let url = format!("sqlite://{}?cache=shared", db.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, url);
        assert!(td.path().join("nested").exists());
    }
}
