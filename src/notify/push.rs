use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Channel, Delivery, Notifier, NotifyError};

/// JSON body posted to the push endpoint.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PushPayload<'a> {
    pub title: &'a str,
    pub body: String,
    pub format: &'static str,
}

/// Generic push webhook (Apprise-compatible `{title, body, format}`).
#[derive(Clone)]
pub struct PushNotifier {
    http: Client,
    url: Url,
}

impl fmt::Debug for PushNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The URL may embed a token; only show the host.
        f.debug_struct("PushNotifier")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl PushNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url.trim()).context("invalid push URL")?;
        let http = Client::builder()
            .user_agent(concat!("release-watchbot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build push HTTP client")?;
        Ok(Self { http, url })
    }

    pub fn payload<'a>(delivery: &'a Delivery) -> PushPayload<'a> {
        PushPayload {
            title: &delivery.message.title,
            body: delivery.message.body(delivery.format, delivery.max_chars),
            format: delivery.format.as_str(),
        }
    }

    pub fn build_request(&self, delivery: &Delivery) -> Result<reqwest::Request> {
        self.http
            .post(self.url.clone())
            .json(&Self::payload(delivery))
            .build()
            .context("failed to build push request")
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        let request = self
            .build_request(delivery)
            .map_err(|e| NotifyError::Push(format!("{e:#}")))?;
        debug!(host = ?self.url.host_str(), "sending push notification");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| NotifyError::Push(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "push endpoint rejected notification");
            return Err(NotifyError::PushStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::format::Message;
    use crate::settings::NotificationFormat;

    fn delivery(format: NotificationFormat, max_chars: Option<usize>) -> Delivery {
        Delivery {
            message: Message {
                title: "New release: o/r v2".into(),
                text: "plain body that is fairly long".into(),
                markdown: "**markdown** body".into(),
                html: "<p>html body that is fairly long</p>".into(),
                truncation_marker: "[truncated]".into(),
            },
            format,
            max_chars,
            recipient: None,
        }
    }

    #[test]
    fn request_posts_json_payload() {
        let notifier = PushNotifier::new("https://apprise.local/notify/key", Duration::from_secs(5))
            .unwrap();
        let request = notifier
            .build_request(&delivery(NotificationFormat::Text, None))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/notify/key");
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok()),
            Some("application/json")
        );
        let body: serde_json::Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["title"], "New release: o/r v2");
        assert_eq!(body["body"], "plain body that is fairly long");
        assert_eq!(body["format"], "text");
    }

    #[test]
    fn payload_truncates_text_but_not_html() {
        let text = delivery(NotificationFormat::Text, Some(20));
        assert_eq!(PushNotifier::payload(&text).body.chars().count(), 20);

        let html = delivery(NotificationFormat::Html, Some(20));
        let payload = PushNotifier::payload(&html);
        assert_eq!(payload.body, "<p>html body that is fairly long</p>");
        assert_eq!(payload.format, "html");
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(PushNotifier::new("::nope::", Duration::from_secs(1)).is_err());
    }
}
