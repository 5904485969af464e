//! Self-rescheduling background check loop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actions::Watcher;
use crate::config::RunMode;
use crate::fetcher::FetchOptions;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Scheduled,
}

/// Process-wide guard so the loop is scheduled at most once.
#[derive(Debug)]
pub struct Poller {
    scheduled: AtomicBool,
}

static GLOBAL: Poller = Poller::new();

/// The poller shared by the whole process.
pub fn global() -> &'static Poller {
    &GLOBAL
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PollState {
        if self.scheduled.load(Ordering::Acquire) {
            PollState::Scheduled
        } else {
            PollState::Idle
        }
    }

    /// Start the loop. Only production mode polls, and only the first call
    /// schedules anything. The first check runs one interval after start.
    pub fn start(&self, watcher: Watcher, mode: RunMode) -> Option<JoinHandle<()>> {
        if mode != RunMode::Production {
            info!(?mode, "background polling disabled for this run mode");
            return None;
        }
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("background polling already scheduled");
            return None;
        }
        info!("background polling scheduled");
        Some(tokio::spawn(run_loop(watcher)))
    }
}

async fn current_period(watcher: &Watcher) -> Duration {
    match watcher.settings().await {
        Ok(settings) => settings.refresh_period(),
        Err(err) => {
            warn!(error = %err, "failed to read refresh interval; using default");
            Settings::default().refresh_period()
        }
    }
}

async fn run_loop(watcher: Watcher) {
    loop {
        let period = current_period(&watcher).await;
        debug!(seconds = period.as_secs(), "next poll scheduled");
        tokio::time::sleep(period).await;

        info!("poll tick");
        // Run the cycle in its own task so a panic is contained to this tick.
        let cycle = watcher.clone();
        let outcome =
            tokio::spawn(async move { cycle.check_for_new_releases(FetchOptions::default()).await })
                .await;
        match outcome {
            Ok(Ok(summary)) => info!(
                checked = summary.checked,
                total = summary.total,
                sent = summary.notifications_sent,
                failed = summary.failures.len(),
                "poll cycle finished"
            ),
            Ok(Err(err)) => error!(kind = err.kind().as_str(), error = %err, "poll cycle failed"),
            Err(join_err) => error!(error = %join_err, "poll cycle panicked"),
        }
    }
}
