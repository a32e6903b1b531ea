//! Upload validation and cataloging.
//!
//! For every delivered upload event: validate the file extension, record
//! the catalog entry, then confirm the object is actually retrievable.
//! Any failure is surfaced as a typed [`ProcessingError`] so the queue's
//! retry policy applies; the cataloger itself never swallows one.

use crate::catalog::CatalogStore;
use crate::events::UploadEvent;
use crate::object_store::ObjectStore;
use crate::queue::QueueHandler;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// File extensions accepted into the catalog.
const SUPPORTED_EXTENSIONS: [&str; 2] = ["jpeg", "png"];

/// Failures that must reach the queue and trigger redelivery.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("unsupported file extension: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("object not retrievable from storage: {uri}")]
    ObjectUnavailable { uri: String },

    #[error("catalog write failed: {0}")]
    CatalogWrite(String),
}

/// Queue consumer writing validated uploads into the catalog.
pub struct Cataloger {
    catalog: Arc<dyn CatalogStore>,
    objects: Arc<dyn ObjectStore>,
}

impl Cataloger {
    pub fn new(catalog: Arc<dyn CatalogStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { catalog, objects }
    }

    /// Reject keys whose lower-cased extension is not in the supported set.
    fn validate_extension(key: &str) -> Result<(), ProcessingError> {
        match key.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()) {
            Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
            Some(ext) => Err(ProcessingError::UnsupportedFormat {
                extension: format!(".{ext}"),
            }),
            None => Err(ProcessingError::UnsupportedFormat {
                extension: "(none)".to_string(),
            }),
        }
    }
}

#[async_trait]
impl QueueHandler<UploadEvent> for Cataloger {
    type Error = ProcessingError;

    #[instrument(skip(self, event), fields(uri = %event.source.uri()))]
    async fn handle(&self, event: &UploadEvent) -> Result<(), ProcessingError> {
        let key = &event.source.key;

        Self::validate_extension(key)?;

        // Idempotent: a redelivered event re-upserts the same key.
        self.catalog
            .create_entry(key)
            .await
            .map_err(|e| ProcessingError::CatalogWrite(e.to_string()))?;

        let present = self
            .objects
            .exists(&event.source.bucket, key)
            .await
            .map_err(|e| {
                warn!(error = %e, "storage existence check failed");
                ProcessingError::ObjectUnavailable {
                    uri: event.source.uri(),
                }
            })?;

        if !present {
            return Err(ProcessingError::ObjectUnavailable {
                uri: event.source.uri(),
            });
        }

        info!("image cataloged");
        metrics::counter!("catalog.entries.recorded").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalogStore;
    use crate::events::SourceLocation;
    use crate::object_store::MemoryObjectStore;

    fn upload(bucket: &str, key: &str) -> UploadEvent {
        UploadEvent {
            source: SourceLocation {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        }
    }

    #[test]
    fn test_validate_extension() {
        assert!(Cataloger::validate_extension("vacation.png").is_ok());
        assert!(Cataloger::validate_extension("photo.jpeg").is_ok());
        // Case-insensitive
        assert!(Cataloger::validate_extension("LOUD.PNG").is_ok());
        assert!(Cataloger::validate_extension("mixed.JpEg").is_ok());

        assert!(matches!(
            Cataloger::validate_extension("notes.txt"),
            Err(ProcessingError::UnsupportedFormat { extension }) if extension == ".txt"
        ));
        // .jpg is not in the supported set
        assert!(Cataloger::validate_extension("photo.jpg").is_err());
        assert!(matches!(
            Cataloger::validate_extension("no-extension"),
            Err(ProcessingError::UnsupportedFormat { extension }) if extension == "(none)"
        ));
    }

    #[tokio::test]
    async fn test_valid_upload_is_cataloged() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put("bucket1", "vacation.png").await;

        let cataloger = Cataloger::new(catalog.clone(), objects);
        cataloger
            .handle(&upload("bucket1", "vacation.png"))
            .await
            .unwrap();

        let entry = catalog.get_entry("vacation.png").await.unwrap().unwrap();
        assert_eq!(entry.image_name, "vacation.png");
    }

    #[tokio::test]
    async fn test_unsupported_format_writes_nothing() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let objects = Arc::new(MemoryObjectStore::new());

        let cataloger = Cataloger::new(catalog.clone(), objects);
        let result = cataloger.handle(&upload("bucket1", "notes.txt")).await;

        assert!(matches!(
            result,
            Err(ProcessingError::UnsupportedFormat { .. })
        ));
        assert!(catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_object_fails_for_redelivery() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let objects = Arc::new(MemoryObjectStore::new());

        let cataloger = Cataloger::new(catalog.clone(), objects);
        let result = cataloger.handle(&upload("bucket1", "ghost.png")).await;

        assert!(matches!(
            result,
            Err(ProcessingError::ObjectUnavailable { uri }) if uri == "s3://bucket1/ghost.png"
        ));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put("bucket1", "vacation.png").await;

        let cataloger = Cataloger::new(catalog.clone(), objects);
        let event = upload("bucket1", "vacation.png");

        cataloger.handle(&event).await.unwrap();
        catalog
            .set_field("vacation.png", crate::events::MetadataField::Caption, "Sun")
            .await
            .unwrap();
        cataloger.handle(&event).await.unwrap();

        assert_eq!(catalog.len().await, 1);
        let entry = catalog.get_entry("vacation.png").await.unwrap().unwrap();
        assert_eq!(entry.caption.as_deref(), Some("Sun"));
    }
}
