//! Notification sending.
//!
//! Notifications are fire-and-forget: callers treat a send failure as
//! best-effort and never retry through the pipeline.

use crate::config::EmailConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors surfaced by notifiers.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification send failed: {0}")]
    Send(String),
}

/// One outbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body_html: String,
}

/// Fire-and-forget notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// SES-backed email notifier.
pub struct SesNotifier {
    client: SesClient,
    sender: String,
}

impl SesNotifier {
    pub async fn new(config: &EmailConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let client = SesClient::new(&aws_config);

        info!(sender = %config.sender, "SES notifier initialized");

        Ok(Self {
            client,
            sender: config.sender.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SesNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let subject = Content::builder()
            .data(&notification.subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        let html = Content::builder()
            .data(&notification.body_html)
            .charset("UTF-8")
            .build()
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().html(html).build())
            .build();

        self.client
            .send_email()
            .from_email_address(&self.sender)
            .destination(
                Destination::builder()
                    .to_addresses(&notification.to)
                    .build(),
            )
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        debug!(to = %notification.to, subject = %notification.subject, "email sent");
        Ok(())
    }
}

/// Recording notifier for tests: captures sends, optionally failing
/// notifications whose body contains a configured needle.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail_when_contains: Mutex<Option<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications sent so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Sent notifications with the given subject.
    pub async fn sent_with_subject(&self, subject: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.subject == subject)
            .cloned()
            .collect()
    }

    /// Reject future sends whose body contains `needle`.
    pub async fn fail_when_contains(&self, needle: &str) {
        *self.fail_when_contains.lock().await = Some(needle.to_string());
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(needle) = self.fail_when_contains.lock().await.as_deref() {
            if notification.body_html.contains(needle) {
                return Err(NotifyError::Send(format!(
                    "configured to fail sends containing {needle:?}"
                )));
            }
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
