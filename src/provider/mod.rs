//! Hosting providers: repository reference parsing, id normalization and the
//! API seam used by the fetcher and the resolver.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{WatchError, WatchResult};

pub mod client;
pub mod model;

pub use client::HttpProviderClient;
pub use model::ApiRelease;

static SHORTHAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid shorthand regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    Codeberg,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::GitHub, Provider::Codeberg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Codeberg => "codeberg",
        }
    }

    pub fn host(&self) -> &'static str {
        match self {
            Provider::GitHub => "github.com",
            Provider::Codeberg => "codeberg.org",
        }
    }

    fn from_host(host: &str) -> Option<Provider> {
        match host.trim_start_matches("www.").to_ascii_lowercase().as_str() {
            "github.com" => Some(Provider::GitHub),
            "codeberg.org" => Some(Provider::Codeberg),
            _ => None,
        }
    }

    fn from_prefix(prefix: &str) -> Option<Provider> {
        match prefix.to_ascii_lowercase().as_str() {
            "github" => Some(Provider::GitHub),
            "codeberg" => Some(Provider::Codeberg),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `provider + owner/name` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub provider: Provider,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(provider: Provider, owner: &str, name: &str) -> Self {
        Self {
            provider,
            owner: owner.to_string(),
            name: name.trim_end_matches(".git").to_string(),
        }
    }

    /// Canonical id: GitHub ids are unprefixed, every other provider is
    /// prefixed with its name. Always lowercase.
    pub fn id(&self) -> String {
        let slug = format!("{}/{}", self.owner, self.name).to_ascii_lowercase();
        match self.provider {
            Provider::GitHub => slug,
            other => format!("{}:{}", other.as_str(), slug),
        }
    }

    pub fn web_url(&self) -> String {
        format!("https://{}/{}/{}", self.provider.host(), self.owner, self.name)
    }
}

/// `owner/name` with no dot-only segment, so `..` never walks out of the
/// repository path on the provider API.
fn is_slug(slug: &str) -> bool {
    SHORTHAND.is_match(slug) && slug.split('/').all(|seg| seg.chars().any(|c| c != '.'))
}

pub fn is_shorthand(input: &str) -> bool {
    is_slug(input.trim())
}

/// Parse user input into a repository reference.
///
/// Accepts web URLs on a supported host (extra path segments such as
/// `/releases` are ignored), `provider:owner/name`, and bare `owner/name`,
/// which means GitHub.
pub fn parse_repo_input(input: &str) -> WatchResult<RepoRef> {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        return parse_repo_url(trimmed);
    }
    if let Some((prefix, rest)) = trimmed.split_once(':') {
        let provider = Provider::from_prefix(prefix)
            .ok_or_else(|| WatchError::InvalidUrl(trimmed.to_string()))?;
        return parse_slug(provider, rest).ok_or_else(|| WatchError::InvalidUrl(trimmed.to_string()));
    }
    parse_slug(Provider::GitHub, trimmed).ok_or_else(|| WatchError::InvalidUrl(trimmed.to_string()))
}

/// Parse a web URL; the host must belong to a supported provider.
pub fn parse_repo_url(input: &str) -> WatchResult<RepoRef> {
    let invalid = || WatchError::InvalidUrl(input.to_string());
    let url = Url::parse(input.trim()).map_err(|_| invalid())?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(invalid());
    }
    let provider = url.host_str().and_then(Provider::from_host).ok_or_else(invalid)?;
    let mut segments = url
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|s| !s.is_empty());
    let owner = segments.next().ok_or_else(invalid)?;
    let name = segments.next().ok_or_else(invalid)?;
    parse_slug(provider, &format!("{owner}/{name}")).ok_or_else(invalid)
}

fn parse_slug(provider: Provider, slug: &str) -> Option<RepoRef> {
    if !is_slug(slug) {
        return None;
    }
    let (owner, name) = slug.split_once('/')?;
    let repo = RepoRef::new(provider, owner, name);
    (!repo.name.is_empty()).then_some(repo)
}

/// Resolve a stored id (`owner/name`, `github:owner/name`, `codeberg:owner/name`).
pub fn repo_ref_from_id(id: &str) -> Option<RepoRef> {
    match id.split_once(':') {
        Some((prefix, rest)) => parse_slug(Provider::from_prefix(prefix)?, rest),
        None => parse_slug(Provider::GitHub, id),
    }
}

/// Canonicalize a stored id. Ids that do not parse are only lowercased.
pub fn normalize_repo_id(id: &str) -> String {
    repo_ref_from_id(id.trim())
        .map(|r| r.id())
        .unwrap_or_else(|| id.trim().to_ascii_lowercase())
}

/// Outcome of one releases page request.
#[derive(Debug, Clone)]
pub enum ReleasePage {
    NotModified,
    Page {
        releases: Vec<ApiRelease>,
        etag: Option<String>,
    },
}

/// Provider HTTP surface. Implementations map any status other than 200/304
/// (and transport failures) to [`WatchError::Network`].
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Lightweight existence probe; returns the HTTP status.
    async fn probe(&self, repo: &RepoRef) -> WatchResult<u16>;

    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> WatchResult<ReleasePage>;
}
