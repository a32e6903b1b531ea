//! Photo Catalog - event-driven image ingestion pipeline
//!
//! This library connects four stages around a durable image catalog:
//!
//! - Envelope parsing of nested transport notifications into typed events
//! - Topic fan-out with attribute-filtered subscriptions
//! - Buffered delivery with bounded retry and dead-lettering
//! - Idempotent validation-and-cataloging plus filtered metadata updates
//!
//! Collaborators (catalog store, object store, notifier) are injected as
//! trait objects, so the pipeline runs unchanged against Postgres/S3/SES
//! or against in-memory fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use photo_catalog::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::new(
//!         &QueueConfig::default(),
//!         "uploader@example.com",
//!         Arc::new(MemoryCatalogStore::new()),
//!         Arc::new(MemoryObjectStore::new()),
//!         Arc::new(MemoryNotifier::new()),
//!     );
//!
//!     let raw = r#"{"Records":[]}"#;
//!     pipeline.ingest_upload_payload(raw).await.unwrap();
//!     pipeline.shutdown().await;
//! }
//! ```

pub mod api;
pub mod catalog;
pub mod cataloger;
pub mod config;
pub mod envelope;
pub mod events;
pub mod mailer;
pub mod metadata;
pub mod notify;
pub mod object_store;
pub mod pipeline;
pub mod queue;
pub mod router;

// Re-export main types
pub use catalog::{CatalogEntry, CatalogError, CatalogStore, FieldUpdate, MemoryCatalogStore};
pub use cataloger::{Cataloger, ProcessingError};
pub use config::{Config, QueueConfig};
pub use envelope::{EnvelopeError, ParsedRecord};
pub use events::{Attributes, MetadataEvent, MetadataField, SourceLocation, UploadEvent};
pub use notify::{MemoryNotifier, Notification, Notifier, NotifyError};
pub use object_store::{MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use pipeline::Pipeline;
pub use queue::{BufferedQueue, DeadLetter, DeadLetterQueue, QueueHandler, QueueSender};
pub use router::{FilterPolicy, Subscriber, TopicRouter};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::{CatalogStore, MemoryCatalogStore};
    pub use crate::config::QueueConfig;
    pub use crate::events::{MetadataEvent, MetadataField, UploadEvent};
    pub use crate::notify::{MemoryNotifier, Notifier};
    pub use crate::object_store::{MemoryObjectStore, ObjectStore};
    pub use crate::pipeline::Pipeline;
    pub use crate::router::{FilterPolicy, TopicRouter};
}
