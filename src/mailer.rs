//! Upload outcome notifications.
//!
//! The confirmation mailer subscribes to the upload fan-out directly, so
//! the uploader hears "received" before validation completes. The
//! rejection mailer drains the dead-letter queue for uploads that
//! exhausted their retries. Both isolate per-item send failures: one bad
//! notification is logged and skipped, never aborting the rest.

use crate::events::{Attributes, UploadEvent};
use crate::notify::{Notification, Notifier};
use crate::queue::{DeadLetter, DeadLetterQueue};
use crate::router::Subscriber;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Sends a "received" notification per observed upload.
pub struct ConfirmationMailer {
    notifier: Arc<dyn Notifier>,
    recipient: String,
}

impl ConfirmationMailer {
    pub fn new(notifier: Arc<dyn Notifier>, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl Subscriber<UploadEvent> for ConfirmationMailer {
    async fn deliver(&self, event: UploadEvent, _attributes: &Attributes) -> anyhow::Result<()> {
        let uri = event.source.uri();
        let notification = Notification {
            to: self.recipient.clone(),
            subject: "New Image Upload".to_string(),
            body_html: format!("<p>We received your image. Its URL is {uri}</p>"),
        };

        // Best-effort: a failed confirmation never propagates.
        match self.notifier.send(&notification).await {
            Ok(()) => {
                info!(uri = %uri, "confirmation sent");
                metrics::counter!("notifications.confirmations.sent").increment(1);
            }
            Err(e) => {
                warn!(uri = %uri, error = %e, "failed to send confirmation");
                metrics::counter!("notifications.send_failures").increment(1);
            }
        }

        Ok(())
    }
}

/// Drains the dead-letter queue and notifies the uploader of each
/// permanently failed upload.
pub struct RejectionMailer {
    notifier: Arc<dyn Notifier>,
    recipient: String,
}

impl RejectionMailer {
    pub fn new(notifier: Arc<dyn Notifier>, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
        }
    }

    /// Consume dead letters until the queue closes.
    pub async fn run(&self, mut dlq: DeadLetterQueue<UploadEvent>) {
        info!("starting rejection mailer");
        while let Some(dead) = dlq.recv().await {
            self.notify_failure(&dead).await;
        }
        info!("rejection mailer stopped");
    }

    async fn notify_failure(&self, dead: &DeadLetter<UploadEvent>) {
        let uri = dead.payload.source.uri();
        let notification = Notification {
            to: self.recipient.clone(),
            subject: "FAILED: Image Upload".to_string(),
            body_html: format!(
                "<p>We did not process your image: {}. Its URL was {uri}</p>",
                dead.last_error
            ),
        };

        match self.notifier.send(&notification).await {
            Ok(()) => {
                info!(uri = %uri, attempts = dead.attempts, "rejection sent");
                metrics::counter!("notifications.rejections.sent").increment(1);
            }
            Err(e) => {
                warn!(uri = %uri, error = %e, "failed to send rejection");
                metrics::counter!("notifications.send_failures").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SourceLocation;
    use crate::notify::MemoryNotifier;
    use chrono::Utc;
    use uuid::Uuid;

    fn upload(key: &str) -> UploadEvent {
        UploadEvent {
            source: SourceLocation {
                bucket: "bucket1".to_string(),
                key: key.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_confirmation_references_object_uri() {
        let notifier = Arc::new(MemoryNotifier::new());
        let mailer = ConfirmationMailer::new(notifier.clone(), "user@example.com");

        mailer
            .deliver(upload("vacation.png"), &Attributes::new())
            .await
            .unwrap();

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "New Image Upload");
        assert!(sent[0].body_html.contains("s3://bucket1/vacation.png"));
    }

    #[tokio::test]
    async fn test_send_failure_is_isolated() {
        let notifier = Arc::new(MemoryNotifier::new());
        notifier.fail_when_contains("bad.png").await;
        let mailer = ConfirmationMailer::new(notifier.clone(), "user@example.com");

        // The failing event must not poison the one after it.
        mailer
            .deliver(upload("bad.png"), &Attributes::new())
            .await
            .unwrap();
        mailer
            .deliver(upload("good.png"), &Attributes::new())
            .await
            .unwrap();

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body_html.contains("good.png"));
    }

    #[tokio::test]
    async fn test_rejection_notification_content() {
        let notifier = Arc::new(MemoryNotifier::new());
        let mailer = RejectionMailer::new(notifier.clone(), "user@example.com");

        let dead = DeadLetter {
            id: Uuid::new_v4(),
            payload: upload("notes.txt"),
            attempts: 3,
            last_error: "unsupported file extension: .txt".to_string(),
            enqueued_at: Utc::now(),
            dead_lettered_at: Utc::now(),
        };
        mailer.notify_failure(&dead).await;

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "FAILED: Image Upload");
        assert!(sent[0].body_html.contains("s3://bucket1/notes.txt"));
        assert!(sent[0].body_html.contains("unsupported file extension"));
    }
}
