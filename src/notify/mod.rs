//! Notification delivery: message rendering plus the push and email channels.
pub mod email;
pub mod format;
pub mod push;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::i18n::Translator;
use crate::model::{Release, Repository};
use crate::settings::Settings;

pub use email::EmailNotifier;
pub use format::{build_message, Message};
pub use push::PushNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Email,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "apprise" => Ok(Channel::Push),
            "email" | "smtp" => Ok(Channel::Email),
            other => Err(format!("unknown notification channel: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} channel is not configured")]
    NotConfigured(Channel),
    #[error("push request failed: {0}")]
    Push(String),
    #[error("push endpoint returned {status}: {body}")]
    PushStatus { status: u16, body: String },
    #[error("invalid email address: {0}")]
    Address(String),
    #[error("email delivery failed: {0}")]
    Email(String),
}

impl NotifyError {
    pub fn status(&self) -> Option<u16> {
        match self {
            NotifyError::PushStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One rendered message bound for a channel.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub format: crate::settings::NotificationFormat,
    pub max_chars: Option<usize>,
    pub recipient: Option<String>,
}

impl Delivery {
    pub fn new(message: Message, settings: &Settings, recipient: Option<&str>) -> Self {
        Self {
            message,
            format: settings.apprise_format,
            max_chars: settings.apprise_max_characters,
            recipient: recipient.map(str::to_string),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> Channel;
    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError>;
}

/// Outcome of one dispatch across every configured channel.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<Channel>,
    pub failures: Vec<(Channel, NotifyError)>,
}

impl DispatchReport {
    /// True when nothing failed, including the no-channel case.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|(channel, err)| format!("{channel}: {err}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Fans a message out to every configured channel.
#[derive(Clone, Default)]
pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.app.http_timeout_seconds);
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(push) = &cfg.notifications.push {
            notifiers.push(Arc::new(PushNotifier::new(&push.url, timeout)?));
        }
        if let Some(email) = &cfg.notifications.email {
            notifiers.push(Arc::new(EmailNotifier::from_config(email, timeout)?));
        }
        Ok(Self { notifiers })
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Render and send a release notice. Channels run concurrently and fail independently.
    pub async fn send(
        &self,
        repo: &Repository,
        release: &Release,
        settings: &Settings,
        t: &dyn Translator,
        recipient: Option<&str>,
    ) -> DispatchReport {
        if self.notifiers.is_empty() {
            warn!(repo = %repo.id, "no notification channel configured; skipping");
            return DispatchReport::default();
        }
        let delivery = Delivery::new(build_message(repo, release, settings, t), settings, recipient);
        let report = self.deliver_all(&self.notifiers, &delivery).await;
        info!(
            repo = %repo.id,
            tag = %release.tag_name,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "notification dispatched"
        );
        report
    }

    /// Send the synthetic test release through `channel`, or every channel when `None`.
    pub async fn send_test(
        &self,
        channel: Option<Channel>,
        settings: &Settings,
        t: &dyn Translator,
        recipient: Option<&str>,
    ) -> Result<DispatchReport, NotifyError> {
        let targets: Vec<Arc<dyn Notifier>> = match channel {
            Some(wanted) => {
                let found: Vec<_> = self
                    .notifiers
                    .iter()
                    .filter(|n| n.channel() == wanted)
                    .cloned()
                    .collect();
                if found.is_empty() {
                    return Err(NotifyError::NotConfigured(wanted));
                }
                found
            }
            None => self.notifiers.clone(),
        };
        if targets.is_empty() {
            warn!("no notification channel configured; skipping test notification");
            return Ok(DispatchReport::default());
        }

        let repo = Repository::new(
            crate::fetcher::TEST_REPO_ID,
            "https://github.com/test/test",
        );
        let mut message = build_message(&repo, &crate::fetcher::synthetic_release(), settings, t);
        message.title = t.translate("notification.test_title", &[]);
        let delivery = Delivery::new(message, settings, recipient);
        Ok(self.deliver_all(&targets, &delivery).await)
    }

    async fn deliver_all(&self, targets: &[Arc<dyn Notifier>], delivery: &Delivery) -> DispatchReport {
        let results = join_all(targets.iter().map(|n| async move {
            (n.channel(), n.deliver(delivery).await)
        }))
        .await;

        let mut report = DispatchReport::default();
        for (channel, result) in results {
            match result {
                Ok(()) => report.delivered.push(channel),
                Err(err) => {
                    warn!(%channel, error = %err, "notification delivery failed");
                    report.failures.push((channel, err));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::synthetic_release;
    use crate::i18n::EnglishCatalog;
    use tokio::sync::Mutex;

    struct Fake {
        channel: Channel,
        fail: bool,
        seen: Mutex<Vec<Delivery>>,
    }

    impl Fake {
        fn new(channel: Channel, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Notifier for Fake {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
            self.seen.lock().await.push(delivery.clone());
            if self.fail {
                Err(NotifyError::PushStatus {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn repo() -> Repository {
        Repository::new("o/r", "https://github.com/o/r")
    }

    #[tokio::test]
    async fn no_channels_is_a_quiet_success() {
        let d = Dispatcher::default();
        let report = d
            .send(&repo(), &synthetic_release(), &Settings::default(), &EnglishCatalog::default(), None)
            .await;
        assert!(report.is_success());
        assert!(report.delivered.is_empty());
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let push = Fake::new(Channel::Push, true);
        let email = Fake::new(Channel::Email, false);
        let d = Dispatcher::new(vec![push.clone(), email.clone()]);
        let report = d
            .send(
                &repo(),
                &synthetic_release(),
                &Settings::default(),
                &EnglishCatalog::default(),
                Some("me@example.org"),
            )
            .await;

        assert_eq!(report.delivered, vec![Channel::Email]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].1.status(), Some(500));
        assert!(report.error_summary().unwrap().contains("push endpoint returned 500"));

        let seen = email.seen.lock().await;
        assert_eq!(seen[0].recipient.as_deref(), Some("me@example.org"));
        assert_eq!(seen[0].message.title, "New release: o/r v1.0.0");
    }

    #[tokio::test]
    async fn test_notification_requires_the_channel() {
        let d = Dispatcher::new(vec![Fake::new(Channel::Push, false)]);
        let err = d
            .send_test(Some(Channel::Email), &Settings::default(), &EnglishCatalog::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured(Channel::Email)));

        let report = d
            .send_test(Some(Channel::Push), &Settings::default(), &EnglishCatalog::default(), None)
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![Channel::Push]);
    }

    #[test]
    fn channel_parses_aliases() {
        assert_eq!("SMTP".parse::<Channel>(), Ok(Channel::Email));
        assert_eq!("apprise".parse::<Channel>(), Ok(Channel::Push));
        assert!("pager".parse::<Channel>().is_err());
    }
}
