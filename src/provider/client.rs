use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH};
use reqwest::{Client, Method, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::{ApiRelease, Provider, ProviderApi, ReleasePage, RepoRef};
use crate::config::Config;
use crate::error::{WatchError, WatchResult};

const USER_AGENT: &str = concat!("release-watchbot/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
struct Endpoint {
    base_url: Url,
    token: Option<String>,
}

/// reqwest-backed [`ProviderApi`] for GitHub and Codeberg.
#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    github: Endpoint,
    codeberg: Endpoint,
}

impl fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("github", &self.github.base_url)
            .field("codeberg", &self.codeberg.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpProviderClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(cfg.app.http_timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;
        let github = Endpoint {
            base_url: Url::parse(&cfg.github.api_base).context("invalid github.api_base")?,
            token: cfg.github.token().map(str::to_string),
        };
        let codeberg = Endpoint {
            base_url: Url::parse(&cfg.codeberg.api_base).context("invalid codeberg.api_base")?,
            token: cfg.codeberg.token().map(str::to_string),
        };
        Ok(Self {
            http,
            github,
            codeberg,
        })
    }

    fn endpoint(&self, provider: Provider) -> &Endpoint {
        match provider {
            Provider::GitHub => &self.github,
            Provider::Codeberg => &self.codeberg,
        }
    }

    fn repo_path(repo: &RepoRef) -> String {
        match repo.provider {
            Provider::GitHub => format!("repos/{}/{}", repo.owner, repo.name),
            Provider::Codeberg => format!("api/v1/repos/{}/{}", repo.owner, repo.name),
        }
    }

    fn request(&self, method: Method, repo: &RepoRef, path: &str) -> Result<reqwest::RequestBuilder> {
        let endpoint = self.endpoint(repo.provider);
        let url = endpoint
            .base_url
            .join(path)
            .with_context(|| format!("invalid {} API URL", repo.provider))?;
        let accept = match repo.provider {
            Provider::GitHub => "application/vnd.github+json",
            Provider::Codeberg => "application/json",
        };
        let mut builder = self.http.request(method, url).header(ACCEPT, accept);
        if let Some(token) = &endpoint.token {
            let value = match repo.provider {
                Provider::GitHub => format!("Bearer {token}"),
                Provider::Codeberg => format!("token {token}"),
            };
            builder = builder.header(AUTHORIZATION, value);
        }
        Ok(builder)
    }

    pub fn build_probe_request(&self, repo: &RepoRef) -> Result<reqwest::Request> {
        self.request(Method::HEAD, repo, &Self::repo_path(repo))?
            .build()
            .context("failed to build probe request")
    }

    pub fn build_releases_request(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> Result<reqwest::Request> {
        let path = format!("{}/releases", Self::repo_path(repo));
        let size_param = match repo.provider {
            Provider::GitHub => "per_page",
            Provider::Codeberg => "limit",
        };
        let mut builder = self
            .request(Method::GET, repo, &path)?
            .query(&[(size_param, per_page), ("page", page)]);
        if let Some(etag) = etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        builder.build().context("failed to build releases request")
    }
}

fn transport_error(err: reqwest::Error) -> WatchError {
    WatchError::network(err.status().map(|s| s.as_u16()), err.to_string())
}

#[async_trait]
impl ProviderApi for HttpProviderClient {
    async fn probe(&self, repo: &RepoRef) -> WatchResult<u16> {
        let request = self
            .build_probe_request(repo)
            .map_err(|e| WatchError::network(None, format!("{e:#}")))?;
        debug!(url = %request.url(), "probing repository");
        let res = self.http.execute(request).await.map_err(transport_error)?;
        Ok(res.status().as_u16())
    }

    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> WatchResult<ReleasePage> {
        let request = self
            .build_releases_request(repo, page, per_page, etag)
            .map_err(|e| WatchError::network(None, format!("{e:#}")))?;
        debug!(url = %request.url(), conditional = etag.is_some(), "fetching releases");
        let res = self.http.execute(request).await.map_err(transport_error)?;

        let status = res.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(ReleasePage::NotModified);
        }
        if status != StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            return Err(WatchError::network(
                Some(status.as_u16()),
                format!("{} releases request failed: {}", repo.provider, body.trim()),
            ));
        }

        let etag = res
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let releases: Vec<ApiRelease> = res
            .json()
            .await
            .map_err(|e| WatchError::network(Some(status.as_u16()), format!("invalid releases payload: {e}")))?;
        Ok(ReleasePage::Page { releases, etag })
    }
}
