//! Filtered metadata application.
//!
//! The updater sits behind a router filter that only admits the allowed
//! metadata fields, and still re-validates the field name defensively:
//! malformed metadata is a logged discard, never a delivery failure. An
//! update targeting an image with no catalog entry is likewise discarded
//! terminally, so a partial entry is never created.

use crate::catalog::{CatalogStore, FieldUpdate};
use crate::events::{Attributes, MetadataEvent, MetadataField};
use crate::router::Subscriber;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Applies single-field updates to existing catalog entries.
pub struct MetadataUpdater {
    catalog: Arc<dyn CatalogStore>,
}

impl MetadataUpdater {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Subscriber<MetadataEvent> for MetadataUpdater {
    #[instrument(skip(self, event), fields(image = %event.image_name, field = %event.field))]
    async fn deliver(&self, event: MetadataEvent, _attributes: &Attributes) -> anyhow::Result<()> {
        let field: MetadataField = match event.field.parse() {
            Ok(field) => field,
            Err(e) => {
                warn!(error = %e, "discarding metadata event with invalid field");
                metrics::counter!("metadata.discarded.invalid_field").increment(1);
                return Ok(());
            }
        };

        match self
            .catalog
            .set_field(&event.image_name, field, &event.value)
            .await
        {
            Ok(FieldUpdate::Applied) => {
                info!("metadata applied");
                metrics::counter!("metadata.applied").increment(1);
            }
            Ok(FieldUpdate::UnknownImage) => {
                warn!("no catalog entry for metadata target, discarding");
                metrics::counter!("metadata.discarded.unknown_image").increment(1);
            }
            Err(e) => {
                // The metadata channel is not queue-buffered: persistence
                // errors are logged and dropped, not retried.
                error!(error = %e, "metadata update failed");
                metrics::counter!("metadata.update_failures").increment(1);
            }
        }

        Ok(())
    }
}
