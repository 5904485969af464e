//! Per-repository release fetching with ETag revalidation and a cache window.
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, instrument};

use crate::error::{WatchError, WatchResult};
use crate::filter::select_latest;
use crate::model::{Release, Repository};
use crate::provider::{parse_repo_url, ProviderApi, ReleasePage};
use crate::settings::Settings;

/// Id of the virtual repository served without network access.
pub const TEST_REPO_ID: &str = "test/test";

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub skip_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Cache interval not elapsed; no request was made.
    CacheWindow,
    /// Provider answered 304.
    NotModified,
    /// Provider answered 200.
    Fresh,
    /// Synthetic release for [`TEST_REPO_ID`].
    Virtual,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source: FetchSource,
    /// Latest release passing the repository's filter. For cached sources this
    /// is the repository's stored `latest_release`.
    pub release: Option<Release>,
    /// ETag from the first page of a fresh response.
    pub etag: Option<String>,
}

impl FetchResult {
    /// Whether the result carries new upstream data the detector should see.
    pub fn is_fresh(&self) -> bool {
        matches!(self.source, FetchSource::Fresh | FetchSource::Virtual)
    }

    /// Record the conditional-request state on `repo`. Cached results only
    /// touch `last_checked` when the provider was actually asked.
    pub fn apply_cache_state(&self, repo: &mut Repository, now: DateTime<Utc>) {
        match self.source {
            FetchSource::Fresh => {
                if let Some(etag) = &self.etag {
                    repo.etag = Some(etag.clone());
                }
                repo.last_checked = Some(now);
            }
            FetchSource::NotModified | FetchSource::Virtual => repo.last_checked = Some(now),
            FetchSource::CacheWindow => {}
        }
    }
}

/// Deterministic release returned for [`TEST_REPO_ID`].
pub fn synthetic_release() -> Release {
    let published = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap_or_default();
    Release {
        id: 0,
        html_url: "https://github.com/test/test/releases/tag/v1.0.0".to_string(),
        tag_name: "v1.0.0".to_string(),
        name: Some("Test release".to_string()),
        body: "## What's changed\n\n\
               - Added **bold** feature\n\
               - Fixed `inline code` handling\n\n\
               See the [changelog](https://github.com/test/test/blob/main/CHANGELOG.md)."
            .to_string(),
        created_at: published,
        published_at: Some(published),
        prerelease: false,
        draft: false,
    }
}

/// Fetch the latest matching release for `repo`.
///
/// Errors leave the repository untouched; the caller only mutates it through
/// [`FetchResult::apply_cache_state`] on success.
#[instrument(skip_all, fields(repo = %repo.id))]
pub async fn fetch_latest_release(
    api: &dyn ProviderApi,
    repo: &Repository,
    settings: &Settings,
    options: FetchOptions,
    now: DateTime<Utc>,
) -> WatchResult<FetchResult> {
    let filter = settings.filter_for(&repo.settings);

    if repo.id == TEST_REPO_ID {
        return Ok(FetchResult {
            source: FetchSource::Virtual,
            release: select_latest(&[synthetic_release()], &filter),
            etag: None,
        });
    }

    let target = parse_repo_url(&repo.url)?;

    let within_cache_window = repo
        .last_checked
        .is_some_and(|checked| now.signed_duration_since(checked) < settings.cache_period());
    if !options.skip_cache && within_cache_window {
        debug!("cache interval not elapsed; skipping provider call");
        return Ok(FetchResult {
            source: FetchSource::CacheWindow,
            release: repo.latest_release.clone(),
            etag: None,
        });
    }

    // A 304 is only useful when there is a cached release to fall back on.
    let conditional = if options.skip_cache || repo.latest_release.is_none() {
        None
    } else {
        repo.etag.as_deref()
    };

    let cap = filter.releases_per_page as usize;
    let page_size = filter.page_size();
    let mut releases: Vec<Release> = Vec::new();
    let mut etag = None;
    let mut page = 1;
    loop {
        let etag_header = if page == 1 { conditional } else { None };
        match api
            .list_releases(&target, page, page_size, etag_header)
            .await?
        {
            ReleasePage::NotModified if page == 1 => {
                debug!("releases not modified");
                return Ok(FetchResult {
                    source: FetchSource::NotModified,
                    release: repo.latest_release.clone(),
                    etag: None,
                });
            }
            ReleasePage::NotModified => break,
            ReleasePage::Page {
                releases: batch,
                etag: page_etag,
            } => {
                if page == 1 {
                    etag = page_etag;
                }
                let full_page = batch.len() as u32 >= page_size;
                releases.extend(batch.into_iter().map(Release::from));
                if !full_page || releases.len() >= cap {
                    break;
                }
            }
        }
        page += 1;
    }
    releases.truncate(cap);

    let release = select_latest(&releases, &filter);
    info!(
        fetched = releases.len(),
        latest = release.as_ref().map(|r| r.tag_name.as_str()).unwrap_or("-"),
        "fetched releases"
    );
    Ok(FetchResult {
        source: FetchSource::Fresh,
        release,
        etag,
    })
}

/// Validate a repository without fetching: the URL host must be supported.
pub fn validate_repository(repo: &Repository) -> WatchResult<()> {
    if repo.id == TEST_REPO_ID {
        return Ok(());
    }
    parse_repo_url(&repo.url).map(|_| ()).map_err(|_| WatchError::InvalidUrl(repo.url.clone()))
}
