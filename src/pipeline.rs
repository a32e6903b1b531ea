//! Pipeline assembly.
//!
//! Wires the envelope parser, topic routers, buffered queue and workers
//! around injected collaborators (catalog store, object store, notifier),
//! so the whole flow runs against real adapters in production and
//! in-memory fakes in tests.

use crate::cataloger::Cataloger;
use crate::catalog::CatalogStore;
use crate::config::QueueConfig;
use crate::envelope::{self, EnvelopeError, ParsedRecord};
use crate::events::{
    Attributes, MetadataEvent, MetadataField, UploadEvent, METADATA_TYPE_ATTRIBUTE,
};
use crate::mailer::{ConfirmationMailer, RejectionMailer};
use crate::metadata::MetadataUpdater;
use crate::notify::Notifier;
use crate::object_store::ObjectStore;
use crate::queue::{self, QueueSender, ShutdownHandle};
use crate::router::{FilterPolicy, Subscriber, TopicRouter};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Adapts the queue's producer handle to a topic subscription.
struct QueueSubscriber {
    sender: QueueSender<UploadEvent>,
}

#[async_trait]
impl Subscriber<UploadEvent> for QueueSubscriber {
    async fn deliver(&self, event: UploadEvent, _attributes: &Attributes) -> anyhow::Result<()> {
        self.sender.enqueue(event).await.map_err(Into::into)
    }
}

/// The assembled ingestion pipeline.
pub struct Pipeline {
    upload_topic: TopicRouter<UploadEvent>,
    metadata_topic: TopicRouter<MetadataEvent>,
    queue_shutdown: ShutdownHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Wire the pipeline and spawn its workers.
    pub fn new(
        queue_config: &QueueConfig,
        recipient: impl Into<String>,
        catalog: Arc<dyn CatalogStore>,
        objects: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let recipient = recipient.into();

        let (sender, queue, dlq) = queue::buffered::<UploadEvent>(queue_config);
        let queue_shutdown = queue.shutdown_handle();

        // Upload fan-out: buffered validation path plus direct confirmation.
        let mut upload_topic = TopicRouter::new("new-image");
        upload_topic.subscribe("image-process-queue", Arc::new(QueueSubscriber { sender }));
        upload_topic.subscribe(
            "confirmation-mailer",
            Arc::new(ConfirmationMailer::new(notifier.clone(), recipient.clone())),
        );

        // Metadata fan-out, gated on the field allow-list.
        let mut metadata_topic = TopicRouter::new("metadata");
        metadata_topic.subscribe_filtered(
            "metadata-updater",
            FilterPolicy::new().allow(
                METADATA_TYPE_ATTRIBUTE,
                MetadataField::ALL.map(|f| f.as_str()),
            ),
            Arc::new(MetadataUpdater::new(catalog.clone())),
        );

        let cataloger = Arc::new(Cataloger::new(catalog, objects));
        let queue_worker = tokio::spawn(queue.run(cataloger));

        let rejection_mailer = RejectionMailer::new(notifier, recipient);
        let rejection_worker = tokio::spawn(async move { rejection_mailer.run(dlq).await });

        info!("pipeline started");

        Self {
            upload_topic,
            metadata_topic,
            queue_shutdown,
            workers: vec![queue_worker, rejection_worker],
        }
    }

    /// Feed a raw upload transport payload into the pipeline.
    ///
    /// Returns the number of upload events published.
    pub async fn ingest_upload_payload(&self, raw: &str) -> Result<usize, EnvelopeError> {
        let mut published = 0;
        for record in envelope::parse_upload_notification(raw)? {
            match record {
                ParsedRecord::Upload(event) => {
                    self.upload_topic.publish(event, &Attributes::new()).await;
                    published += 1;
                }
                ParsedRecord::Unrecognized => {
                    debug!("skipping record without storage events");
                }
                ParsedRecord::Metadata { .. } => {
                    warn!("metadata record on upload channel, skipping");
                }
            }
        }
        Ok(published)
    }

    /// Feed a raw metadata transport payload into the pipeline.
    ///
    /// Returns the number of metadata events published. Events whose
    /// routing attribute misses the filter are published but delivered
    /// nowhere, by design.
    pub async fn ingest_metadata_payload(&self, raw: &str) -> Result<usize, EnvelopeError> {
        let mut published = 0;
        for record in envelope::parse_metadata_notification(raw)? {
            match record {
                ParsedRecord::Metadata { event, attributes } => {
                    self.metadata_topic.publish(event, &attributes).await;
                    published += 1;
                }
                ParsedRecord::Unrecognized => {
                    debug!("skipping unrecognized metadata record");
                }
                ParsedRecord::Upload(_) => {
                    warn!("upload record on metadata channel, skipping");
                }
            }
        }
        Ok(published)
    }

    /// True while the queue and rejection workers are alive.
    pub fn is_running(&self) -> bool {
        self.workers.iter().all(|worker| !worker.is_finished())
    }

    /// Stop the queue worker and wait for both workers to drain.
    pub async fn shutdown(self) {
        info!("shutting down pipeline");
        self.queue_shutdown.shutdown();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
