pub mod actions;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod i18n;
pub mod jobs;
pub mod model;
pub mod notify;
pub mod poller;
pub mod provider;
pub mod queue;
pub mod resolver;
pub mod settings;

pub use actions::Watcher;
pub use error::{WatchError, WatchResult};
