//! Error taxonomy shared by the release pipeline and the actions built on it.
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("unsupported repository URL: {0}")]
    InvalidUrl(String),
    #[error("repository not found: {0}")]
    NotFound(String),
    #[error("network error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Network { status: Option<u16>, message: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("notification channel not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl WatchError {
    /// Stable machine-readable kind, used in batch results and CLI output.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            WatchError::NotFound(_) => ErrorKind::NotFound,
            WatchError::Network { .. } => ErrorKind::NetworkError,
            WatchError::Storage(_) => ErrorKind::StorageError,
            WatchError::NotConfigured(_) => ErrorKind::NotConfigured,
            WatchError::InvalidSettings(_) => ErrorKind::InvalidSettings,
        }
    }

    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        WatchError::Network {
            status,
            message: message.into(),
        }
    }

    /// Flatten an `anyhow` chain from the store layer into a storage error.
    pub fn storage(err: anyhow::Error) -> Self {
        WatchError::Storage(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    NotFound,
    NetworkError,
    StorageError,
    NotConfigured,
    InvalidSettings,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::InvalidSettings => "invalid_settings",
        }
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
