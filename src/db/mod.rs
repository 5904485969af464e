//! Storage contracts and the SQLite implementation.
//!
//! - `repo`: SQL functions and [`SqliteStore`], which persists the repository
//!   list and the settings object as JSON rows.
//!
//! The pipeline only talks to the [`RepositoryStore`] and [`SettingsStore`]
//! traits so alternative backends (and test doubles) can be swapped in.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::Repository;
use crate::settings::Settings;

pub mod repo;

pub use repo::*;

/// Whole-list load/replace of the monitored repositories.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get_repositories(&self) -> Result<Vec<Repository>>;
    async fn save_repositories(&self, repos: &[Repository]) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns defaults when nothing has been saved yet.
    async fn get_settings(&self) -> Result<Settings>;
    async fn save_settings(&self, settings: &Settings) -> Result<()>;
}
