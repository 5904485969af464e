//! Actions over the monitored repository list.
//!
//! Every mutation of the stored list runs inside the [`TaskQueue`], so a check
//! cycle, an import and an acknowledgment never interleave their
//! load-modify-save sequences.
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{RepositoryStore, SettingsStore};
use crate::error::{ErrorKind, WatchError, WatchResult};
use crate::fetcher::{fetch_latest_release, validate_repository, FetchOptions, FetchResult};
use crate::filter::{detect_new_release, Detection};
use crate::i18n::{EnglishCatalog, Translator};
use crate::jobs::JobTracker;
use crate::model::{JobStatus, RepoSettings, Repository};
use crate::notify::{Channel, DispatchReport, Dispatcher, NotifyError};
use crate::provider::{normalize_repo_id, parse_repo_input, ProviderApi};
use crate::queue::TaskQueue;
use crate::resolver::{resolve_candidates, Candidate};
use crate::settings::Settings;

/// Provider calls in flight at once during one check cycle.
pub const FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RepoFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl RepoFailure {
    fn new(id: &str, err: &WatchError) -> Self {
        Self {
            id: id.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: usize,
    pub total: usize,
    pub notifications_sent: usize,
    /// Ids whose latest release changed in this cycle.
    pub new_releases: Vec<String>,
    pub failures: Vec<RepoFailure>,
}

impl CheckSummary {
    pub fn describe(&self, t: &dyn Translator) -> String {
        t.translate(
            "check.summary",
            &[
                ("checked", &self.checked.to_string()),
                ("total", &self.total.to_string()),
                ("sent", &self.notifications_sent.to_string()),
            ],
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AddSummary {
    pub added: Vec<String>,
    /// Already tracked.
    pub skipped: Vec<String>,
    pub invalid: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
    pub invalid: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Scope {
    All,
    /// One repository; unknown ids are an error.
    One(String),
    /// A set of repositories; ids no longer tracked are skipped.
    Ids(Vec<String>),
}

/// Canonicalize ids and merge duplicates, first occurrence wins.
/// Returns whether anything changed.
pub fn normalize_repositories(repos: Vec<Repository>) -> (Vec<Repository>, bool) {
    let mut seen = HashSet::new();
    let mut changed = false;
    let mut out = Vec::with_capacity(repos.len());
    for mut repo in repos {
        let id = normalize_repo_id(&repo.id);
        if id != repo.id {
            debug!(from = %repo.id, to = %id, "normalized repository id");
            repo.id = id;
            changed = true;
        }
        if seen.insert(repo.id.clone()) {
            out.push(repo);
        } else {
            debug!(repo = %repo.id, "dropping duplicate repository");
            changed = true;
        }
    }
    (out, changed)
}

/// Entry point for every release-watching action.
#[derive(Clone)]
pub struct Watcher {
    repos: Arc<dyn RepositoryStore>,
    settings: Arc<dyn SettingsStore>,
    api: Arc<dyn ProviderApi>,
    dispatcher: Dispatcher,
    translator: Arc<dyn Translator>,
    queue: TaskQueue,
    jobs: JobTracker,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(
        repos: Arc<dyn RepositoryStore>,
        settings: Arc<dyn SettingsStore>,
        api: Arc<dyn ProviderApi>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            repos,
            settings,
            api,
            dispatcher,
            translator: Arc::new(EnglishCatalog::default()),
            queue: TaskQueue::new(),
            jobs: JobTracker::new(),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    pub async fn settings(&self) -> WatchResult<Settings> {
        self.settings
            .get_settings()
            .await
            .map_err(WatchError::storage)
    }

    async fn load(&self) -> WatchResult<(Vec<Repository>, bool)> {
        let repos = self
            .repos
            .get_repositories()
            .await
            .map_err(WatchError::storage)?;
        Ok(normalize_repositories(repos))
    }

    async fn save(&self, repos: &[Repository]) -> WatchResult<()> {
        self.repos
            .save_repositories(repos)
            .await
            .map_err(WatchError::storage)
    }

    /// Check every repository and notify about new releases.
    pub async fn check_for_new_releases(&self, options: FetchOptions) -> WatchResult<CheckSummary> {
        let this = self.clone();
        self.queue
            .schedule("check_for_new_releases", move || async move {
                this.run_check(Scope::All, options).await
            })
            .await
    }

    /// Check one repository now, bypassing the cache.
    pub async fn refresh_repository(&self, id: &str) -> WatchResult<CheckSummary> {
        let this = self.clone();
        let scope = Scope::One(normalize_repo_id(id));
        self.queue
            .schedule("refresh_repository", move || async move {
                this.run_check(scope, FetchOptions { skip_cache: true }).await
            })
            .await
    }

    #[instrument(skip_all)]
    async fn run_check(&self, scope: Scope, options: FetchOptions) -> WatchResult<CheckSummary> {
        let settings = self.settings().await?;
        let (mut repos, _) = self.load().await?;

        let targets: Vec<usize> = match &scope {
            Scope::All => (0..repos.len()).collect(),
            Scope::One(id) => {
                let index = repos
                    .iter()
                    .position(|r| &r.id == id)
                    .ok_or_else(|| WatchError::NotFound(id.clone()))?;
                vec![index]
            }
            Scope::Ids(ids) => repos
                .iter()
                .enumerate()
                .filter(|(_, r)| ids.contains(&r.id))
                .map(|(i, _)| i)
                .collect(),
        };

        let mut summary = CheckSummary {
            total: targets.len(),
            ..CheckSummary::default()
        };
        if targets.is_empty() {
            debug!("no repositories to check");
            return Ok(summary);
        }

        let now = Utc::now();
        let api = self.api.as_ref();
        let settings_ref = &settings;
        let repos_ref = &repos;
        let results: Vec<(usize, WatchResult<FetchResult>)> = stream::iter(targets)
            .map(|i| async move {
                let fetched =
                    fetch_latest_release(api, &repos_ref[i], settings_ref, options, now).await;
                (i, fetched)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut fresh_releases = Vec::new();
        for (i, fetched) in results {
            let repo = &mut repos[i];
            match fetched {
                Ok(result) => {
                    summary.checked += 1;
                    result.apply_cache_state(repo, now);
                    if !result.is_fresh() {
                        continue;
                    }
                    match detect_new_release(repo, result.release, settings.show_acknowledge) {
                        Detection::New => {
                            info!(repo = %repo.id, tag = ?repo.last_seen_release_tag, "new release detected");
                            summary.new_releases.push(repo.id.clone());
                            fresh_releases.push(i);
                        }
                        Detection::Baseline => {
                            info!(repo = %repo.id, tag = ?repo.last_seen_release_tag, "baseline recorded");
                        }
                        Detection::Unchanged | Detection::NoRelease => {}
                    }
                }
                Err(err) => {
                    warn!(repo = %repo.id, kind = err.kind().as_str(), error = %err, "release check failed");
                    summary.failures.push(RepoFailure::new(&repo.id, &err));
                }
            }
        }

        // State is committed before anything is sent; delivery failures never
        // roll back the last seen tag.
        self.save(&repos).await?;

        for i in fresh_releases {
            let repo = &repos[i];
            let Some(release) = repo.latest_release.as_ref() else {
                continue;
            };
            let report = self
                .dispatcher
                .send(repo, release, &settings, self.translator.as_ref(), None)
                .await;
            if !report.delivered.is_empty() {
                summary.notifications_sent += 1;
            }
            for (_, err) in &report.failures {
                summary
                    .failures
                    .push(RepoFailure::new(&repo.id, &notify_to_watch(err)));
            }
        }

        info!(
            checked = summary.checked,
            total = summary.total,
            sent = summary.notifications_sent,
            failed = summary.failures.len(),
            "check cycle finished"
        );
        Ok(summary)
    }

    /// Track new repositories given as URLs, `provider:owner/name` or `owner/name`.
    pub async fn add_repositories(&self, inputs: &[String]) -> WatchResult<AddSummary> {
        let this = self.clone();
        let inputs = inputs.to_vec();
        let mut summary = self
            .queue
            .schedule("add_repositories", move || async move {
                let mut summary = AddSummary::default();
                let (mut repos, changed) = this.load().await?;
                for input in inputs {
                    let target = match parse_repo_input(&input) {
                        Ok(target) => target,
                        Err(_) => {
                            summary.invalid.push(input);
                            continue;
                        }
                    };
                    let id = target.id();
                    if repos.iter().any(|r| r.id == id) {
                        summary.skipped.push(id);
                        continue;
                    }
                    repos.push(Repository::new(id.clone(), target.web_url()));
                    summary.added.push(id);
                }
                if !summary.added.is_empty() || changed {
                    this.save(&repos).await?;
                }
                Ok::<_, WatchError>(summary)
            })
            .await?;

        info!(
            added = summary.added.len(),
            skipped = summary.skipped.len(),
            invalid = summary.invalid.len(),
            "repositories added"
        );
        if !summary.added.is_empty() {
            summary.job_id = Some(self.spawn_refresh(summary.added.clone()));
        }
        Ok(summary)
    }

    /// Merge repositories by id. Existing entries are kept as they are, so
    /// importing the same list twice changes nothing.
    pub async fn import_repositories(&self, incoming: Vec<Repository>) -> WatchResult<ImportSummary> {
        let this = self.clone();
        let mut summary = self
            .queue
            .schedule("import_repositories", move || async move {
                let mut summary = ImportSummary::default();
                let (mut repos, changed) = this.load().await?;
                let (incoming, _) = normalize_repositories(incoming);
                for repo in incoming {
                    if validate_repository(&repo).is_err() {
                        summary.invalid.push(repo.id);
                        continue;
                    }
                    if repos.iter().any(|r| r.id == repo.id) {
                        summary.skipped.push(repo.id);
                        continue;
                    }
                    summary.imported.push(repo.id.clone());
                    repos.push(repo);
                }
                if !summary.imported.is_empty() || changed {
                    this.save(&repos).await?;
                }
                Ok::<_, WatchError>(summary)
            })
            .await?;

        info!(
            imported = summary.imported.len(),
            skipped = summary.skipped.len(),
            invalid = summary.invalid.len(),
            "repositories imported"
        );
        if !summary.imported.is_empty() {
            summary.job_id = Some(self.spawn_refresh(summary.imported.clone()));
        }
        Ok(summary)
    }

    /// Baseline-check `ids` in the background, reporting through a job id.
    fn spawn_refresh(&self, ids: Vec<String>) -> String {
        let job_id = JobTracker::new_job_id();
        self.jobs.set_status(&job_id, JobStatus::Pending);

        let this = self.clone();
        let job = job_id.clone();
        tokio::spawn(async move {
            let inner = this.clone();
            let outcome = this
                .queue
                .schedule("refresh_added", move || async move {
                    inner
                        .run_check(Scope::Ids(ids), FetchOptions { skip_cache: true })
                        .await
                })
                .await;
            let status = match outcome {
                Ok(summary) if summary.failures.is_empty() => JobStatus::Complete,
                Ok(summary) => {
                    warn!(job_id = %job, failed = summary.failures.len(), "background refresh had failures");
                    JobStatus::Error
                }
                Err(err) => {
                    error!(job_id = %job, error = %err, "background refresh failed");
                    JobStatus::Error
                }
            };
            this.jobs.set_status(&job, status);
        });
        job_id
    }

    pub async fn resolve_repo_providers(&self, input: &str) -> Vec<Candidate> {
        resolve_candidates(self.api.as_ref(), input).await
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get_status(job_id)
    }

    /// Poll a job until it leaves `Pending`. `None` means it expired or
    /// never existed.
    pub async fn wait_for_job(&self, job_id: &str, every: std::time::Duration) -> Option<JobStatus> {
        loop {
            match self.get_job_status(job_id) {
                Some(JobStatus::Pending) => tokio::time::sleep(every).await,
                other => return other,
            }
        }
    }

    pub async fn list_repositories(&self) -> WatchResult<Vec<Repository>> {
        Ok(self.load().await?.0)
    }

    pub async fn acknowledge_release(&self, id: &str) -> WatchResult<()> {
        let id = normalize_repo_id(id);
        self.mutate_one("acknowledge_release", id, |repo| {
            repo.is_new = false;
            Ok(())
        })
        .await
    }

    /// Clear every unacknowledged flag; returns how many were set.
    pub async fn acknowledge_all(&self) -> WatchResult<usize> {
        let this = self.clone();
        self.queue
            .schedule("acknowledge_all", move || async move {
                let (mut repos, changed) = this.load().await?;
                let mut cleared = 0;
                for repo in repos.iter_mut().filter(|r| r.is_new) {
                    repo.is_new = false;
                    cleared += 1;
                }
                if cleared > 0 || changed {
                    this.save(&repos).await?;
                }
                Ok::<_, WatchError>(cleared)
            })
            .await
    }

    pub async fn remove_repository(&self, id: &str) -> WatchResult<()> {
        let this = self.clone();
        let id = normalize_repo_id(id);
        self.queue
            .schedule("remove_repository", move || async move {
                let (mut repos, _) = this.load().await?;
                let before = repos.len();
                repos.retain(|r| r.id != id);
                if repos.len() == before {
                    return Err(WatchError::NotFound(id));
                }
                this.save(&repos).await?;
                info!(repo = %id, "repository removed");
                Ok::<_, WatchError>(())
            })
            .await
    }

    /// Save global settings. Repositories lose their conditional-request
    /// state only when the effective release filter changed.
    pub async fn update_settings(&self, next: Settings) -> WatchResult<Settings> {
        next.validate()?;
        let next = next.normalized();
        let this = self.clone();
        self.queue
            .schedule("update_settings", move || async move {
                let previous = this.settings().await?.normalized();

                // Repositories first: the new filter must never be stored
                // next to ETags taken under the old one.
                let (mut repos, changed) = this.load().await?;
                let mut invalidated = 0;
                for repo in repos.iter_mut() {
                    if previous.filter_for(&repo.settings) != next.filter_for(&repo.settings) {
                        repo.invalidate_cache();
                        invalidated += 1;
                    }
                }
                if invalidated > 0 || changed {
                    this.save(&repos).await?;
                }
                this.settings
                    .save_settings(&next)
                    .await
                    .map_err(WatchError::storage)?;
                info!(invalidated, "settings updated");
                Ok::<_, WatchError>(next)
            })
            .await
    }

    pub async fn update_repository_settings(&self, id: &str, overrides: RepoSettings) -> WatchResult<()> {
        overrides.validate()?;
        let overrides = overrides.normalized();
        let settings = self.settings().await?;
        let id = normalize_repo_id(id);
        self.mutate_one("update_repository_settings", id, move |repo| {
            if settings.filter_for(&repo.settings) != settings.filter_for(&overrides) {
                repo.invalidate_cache();
            }
            repo.settings = overrides;
            Ok(())
        })
        .await
    }

    async fn mutate_one<F>(&self, name: &str, id: String, apply: F) -> WatchResult<()>
    where
        F: FnOnce(&mut Repository) -> WatchResult<()> + Send + 'static,
    {
        let this = self.clone();
        self.queue
            .schedule(name, move || async move {
                let (mut repos, _) = this.load().await?;
                let repo = repos
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| WatchError::NotFound(id.clone()))?;
                apply(repo)?;
                this.save(&repos).await
            })
            .await
    }

    /// Send the synthetic release through `channel` (every channel when `None`).
    pub async fn send_test_notification(
        &self,
        channel: Option<Channel>,
        recipient: Option<&str>,
    ) -> WatchResult<DispatchReport> {
        let settings = self.settings().await?;
        let report = self
            .dispatcher
            .send_test(channel, &settings, self.translator.as_ref(), recipient)
            .await
            .map_err(|e| notify_to_watch(&e))?;
        if let Some((_, err)) = report.failures.first() {
            return Err(notify_to_watch(err));
        }
        Ok(report)
    }
}

fn notify_to_watch(err: &NotifyError) -> WatchError {
    match err {
        NotifyError::NotConfigured(channel) => WatchError::NotConfigured(channel.as_str()),
        other => WatchError::network(other.status(), other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_merges_prefixed_and_cased_ids() {
        let repos = vec![
            Repository::new("github:Owner/Repo", "https://github.com/Owner/Repo"),
            Repository::new("owner/repo", "https://github.com/owner/repo"),
            Repository::new("codeberg:Forge/Tool", "https://codeberg.org/Forge/Tool"),
        ];
        let (out, changed) = normalize_repositories(repos);
        assert!(changed);
        let ids: Vec<_> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["owner/repo", "codeberg:forge/tool"]);
        assert_eq!(out[0].url, "https://github.com/Owner/Repo");
    }

    #[test]
    fn canonical_list_is_unchanged() {
        let repos = vec![Repository::new("o/r", "https://github.com/o/r")];
        let (_, changed) = normalize_repositories(repos);
        assert!(!changed);
    }

    #[test]
    fn summary_line_uses_catalog() {
        let summary = CheckSummary {
            checked: 3,
            total: 5,
            notifications_sent: 1,
            ..CheckSummary::default()
        };
        assert_eq!(
            summary.describe(&EnglishCatalog::default()),
            "3 of 5 repositories checked, 1 notifications sent"
        );
    }

    #[test]
    fn notify_errors_map_to_taxonomy() {
        let err = notify_to_watch(&NotifyError::NotConfigured(Channel::Email));
        assert_eq!(err.kind(), ErrorKind::NotConfigured);
        let err = notify_to_watch(&NotifyError::PushStatus {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(
            err,
            WatchError::network(Some(502), "push endpoint returned 502: bad gateway")
        );
    }
}
