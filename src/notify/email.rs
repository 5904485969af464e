use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as MailMessage, Tokio1Executor};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::{Channel, Delivery, Notifier, NotifyError};
use crate::config::{Email, SmtpTls};

/// Build the email for `delivery`; an explicit recipient beats `default_to`.
pub fn compose_email(
    from: &Mailbox,
    default_to: &Mailbox,
    delivery: &Delivery,
) -> Result<MailMessage, NotifyError> {
    let to = match delivery.recipient.as_deref().map(str::trim) {
        Some(addr) if !addr.is_empty() => addr
            .parse::<Mailbox>()
            .map_err(|_| NotifyError::Address(addr.to_string()))?,
        _ => default_to.clone(),
    };
    MailMessage::builder()
        .from(from.clone())
        .to(to)
        .subject(delivery.message.title.clone())
        .multipart(MultiPart::alternative_plain_html(
            delivery.message.text.clone(),
            delivery.message.html.clone(),
        ))
        .map_err(|e| NotifyError::Email(e.to_string()))
}

/// SMTP delivery through lettre's tokio transport.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    host: String,
}

impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("host", &self.host)
            .field("to", &self.to.email.to_string())
            .finish_non_exhaustive()
    }
}

impl EmailNotifier {
    pub fn from_config(cfg: &Email, timeout: Duration) -> Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid sender address {}", cfg.from))?;
        let to: Mailbox = cfg
            .to
            .parse()
            .with_context(|| format!("invalid recipient address {}", cfg.to))?;

        let builder = match cfg.tls {
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .context("failed to configure STARTTLS relay")?,
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .context("failed to configure TLS relay")?,
            SmtpTls::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host),
        };
        let mut builder = builder.port(cfg.port).timeout(Some(timeout));
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            host: cfg.host.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        let email = compose_email(&self.from, &self.to, delivery)?;
        debug!(host = %self.host, "sending email notification");
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Email(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::format::Message;
    use crate::settings::NotificationFormat;

    fn delivery(recipient: Option<&str>) -> Delivery {
        Delivery {
            message: Message {
                title: "New release: o/r v2".into(),
                text: "plain".into(),
                markdown: "md".into(),
                html: "<p>html</p>".into(),
                truncation_marker: "[truncated]".into(),
            },
            format: NotificationFormat::Text,
            max_chars: Some(3),
            recipient: recipient.map(str::to_string),
        }
    }

    fn boxes() -> (Mailbox, Mailbox) {
        (
            "Release Watch <watch@example.com>".parse().unwrap(),
            "default@example.com".parse().unwrap(),
        )
    }

    #[test]
    fn uses_default_recipient() {
        let (from, to) = boxes();
        let email = compose_email(&from, &to, &delivery(None)).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("To: default@example.com"));
        assert!(raw.contains("Subject: New release: o/r v2"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn explicit_recipient_overrides_default() {
        let (from, to) = boxes();
        let email = compose_email(&from, &to, &delivery(Some("me@example.org"))).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("To: me@example.org"));
        assert!(!raw.contains("default@example.com"));
    }

    #[test]
    fn bad_override_is_rejected() {
        let (from, to) = boxes();
        let err = compose_email(&from, &to, &delivery(Some("not-an-address"))).unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));
    }
}
