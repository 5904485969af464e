use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Prerelease,
    Draft,
}

impl ReleaseChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseChannel::Stable => "stable",
            ReleaseChannel::Prerelease => "prerelease",
            ReleaseChannel::Draft => "draft",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

/// Normalized release, independent of the provider it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: i64,
    pub html_url: String,
    pub tag_name: String,
    pub name: Option<String>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

impl Release {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.tag_name)
    }

    /// Timestamp used for recency ordering.
    pub fn released_at(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }

    pub fn channel(&self) -> ReleaseChannel {
        if self.draft {
            ReleaseChannel::Draft
        } else if self.prerelease {
            ReleaseChannel::Prerelease
        } else {
            ReleaseChannel::Stable
        }
    }
}

/// Per-repository overrides; `None` falls back to the global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_channels: Option<Vec<ReleaseChannel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_release_sub_channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub releases_per_page: Option<u32>,
}

/// One monitored repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_seen_release_tag: Option<String>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub latest_release: Option<Release>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: RepoSettings,
}

impl Repository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            etag: None,
            last_seen_release_tag: None,
            is_new: false,
            latest_release: None,
            last_checked: None,
            settings: RepoSettings::default(),
        }
    }

    /// Drop the conditional-request state so the next check refetches.
    pub fn invalidate_cache(&mut self) {
        self.etag = None;
        self.last_checked = None;
    }
}
