#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use release_watchbot::db::{RepositoryStore, SettingsStore};
use release_watchbot::error::{WatchError, WatchResult};
use release_watchbot::model::Repository;
use release_watchbot::notify::{Channel, Delivery, Dispatcher, Notifier, NotifyError};
use release_watchbot::provider::{ApiRelease, ProviderApi, ReleasePage, RepoRef};
use release_watchbot::settings::Settings;
use release_watchbot::Watcher;

/// In-memory store with failure switches.
#[derive(Default)]
pub struct MemoryStore {
    pub repos: Mutex<Vec<Repository>>,
    pub settings: Mutex<Settings>,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
    pub fail_loads: AtomicBool,
    pub fail_saves: AtomicBool,
    pub fail_settings: AtomicBool,
}

impl MemoryStore {
    pub fn with(repos: Vec<Repository>, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            repos: Mutex::new(repos),
            settings: Mutex::new(settings),
            ..Self::default()
        })
    }

    pub async fn repo(&self, id: &str) -> Option<Repository> {
        self.repos.lock().await.iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn get_repositories(&self) -> Result<Vec<Repository>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("disk unavailable"));
        }
        Ok(self.repos.lock().await.clone())
    }

    async fn save_repositories(&self, repos: &[Repository]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        *self.repos.lock().await = repos.to_vec();
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self) -> Result<Settings> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(anyhow!("settings unreadable"));
        }
        Ok(self.settings.lock().await.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub id: String,
    pub page: u32,
    pub per_page: u32,
    pub etag: Option<String>,
}

/// Provider fake: scripted pages per repository id, recorded calls.
/// Unscripted repositories answer with an empty page.
#[derive(Default)]
pub struct RecordingApi {
    pub pages: Mutex<HashMap<String, VecDeque<WatchResult<ReleasePage>>>>,
    pub probes: Mutex<HashMap<String, WatchResult<u16>>>,
    pub calls: Mutex<Vec<ListCall>>,
}

impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn script(&self, id: &str, response: WatchResult<ReleasePage>) {
        self.pages
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .push_back(response);
    }

    pub async fn probe_answer(&self, id: &str, answer: WatchResult<u16>) {
        self.probes.lock().await.insert(id.to_string(), answer);
    }

    pub async fn calls_for(&self, id: &str) -> Vec<ListCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProviderApi for RecordingApi {
    async fn probe(&self, repo: &RepoRef) -> WatchResult<u16> {
        self.probes
            .lock()
            .await
            .get(&repo.id())
            .cloned()
            .unwrap_or(Ok(404))
    }

    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> WatchResult<ReleasePage> {
        let id = repo.id();
        self.calls.lock().await.push(ListCall {
            id: id.clone(),
            page,
            per_page,
            etag: etag.map(str::to_string),
        });
        self.pages
            .lock()
            .await
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(ReleasePage::Page {
                releases: Vec::new(),
                etag: None,
            }))
    }
}

/// Notifier fake recording every delivery; optionally fails with a status.
pub struct RecordingNotifier {
    pub channel: Channel,
    pub fail_with: Option<u16>,
    pub deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotifier {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail_with: None,
            deliveries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(channel: Channel, status: u16) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail_with: Some(status),
            deliveries: Mutex::new(Vec::new()),
        })
    }

    pub async fn titles(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .await
            .iter()
            .map(|d| d.message.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        self.deliveries.lock().await.push(delivery.clone());
        match self.fail_with {
            Some(status) => Err(NotifyError::PushStatus {
                status,
                body: "upstream unavailable".into(),
            }),
            None => Ok(()),
        }
    }
}

pub fn api_release(tag: &str, day: u32) -> ApiRelease {
    let at = Utc
        .with_ymd_and_hms(2024, 6, day, 9, 0, 0)
        .single()
        .unwrap();
    ApiRelease {
        id: day as i64,
        html_url: format!("https://github.com/o/r/releases/tag/{tag}"),
        tag_name: tag.to_string(),
        name: None,
        body: Some(format!("Notes for {tag}")),
        created_at: at,
        published_at: Some(at),
        prerelease: false,
        draft: false,
    }
}

pub fn page(releases: Vec<ApiRelease>, etag: Option<&str>) -> WatchResult<ReleasePage> {
    Ok(ReleasePage::Page {
        releases,
        etag: etag.map(str::to_string),
    })
}

pub fn not_modified() -> WatchResult<ReleasePage> {
    Ok(ReleasePage::NotModified)
}

pub fn server_error(status: u16) -> WatchResult<ReleasePage> {
    Err(WatchError::network(Some(status), "server error"))
}

pub fn github(id: &str) -> Repository {
    Repository::new(id, format!("https://github.com/{id}"))
}

pub fn watcher(
    store: &Arc<MemoryStore>,
    api: &Arc<RecordingApi>,
    notifiers: Vec<Arc<dyn Notifier>>,
) -> Watcher {
    Watcher::new(
        store.clone(),
        store.clone(),
        api.clone(),
        Dispatcher::new(notifiers),
    )
}
