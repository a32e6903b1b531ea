//! Catalog persistence for accepted images.
//!
//! The catalog is keyed by image name alone. Creation is an idempotent
//! insert-if-absent so that redelivered upload events can never duplicate
//! an entry or clobber metadata set in the meantime, and metadata updates
//! touch exactly one column.

use crate::config::CatalogConfig;
use crate::events::MetadataField;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Errors surfaced by catalog stores.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog write failed: {0}")]
    Write(String),

    #[error("catalog read failed: {0}")]
    Read(String),
}

/// One accepted image in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CatalogEntry {
    /// Sole key, immutable once set
    pub image_name: String,
    pub caption: Option<String>,
    pub date: Option<String>,
    pub photographer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single-field update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    Applied,
    /// No entry exists for the targeted image; nothing was written
    UnknownImage,
}

/// Keyed upsert interface over the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert-if-absent of the identity key. Safe to repeat and safe under
    /// concurrent writers of the same key.
    async fn create_entry(&self, image_name: &str) -> Result<(), CatalogError>;

    /// Set a single metadata field, leaving sibling fields untouched.
    async fn set_field(
        &self,
        image_name: &str,
        field: MetadataField,
        value: &str,
    ) -> Result<FieldUpdate, CatalogError>;

    /// Fetch an entry by image name.
    async fn get_entry(&self, image_name: &str) -> Result<Option<CatalogEntry>, CatalogError>;
}

fn column_name(field: MetadataField) -> &'static str {
    match field {
        MetadataField::Caption => "caption",
        MetadataField::Date => "date",
        MetadataField::Photographer => "photographer",
    }
}

/// Postgres-backed catalog store.
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Connect a pool using the configured sizing and timeouts.
    pub async fn new(config: &CatalogConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to catalog database");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running catalog migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }

    /// Pool reference for readiness checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn create_entry(&self, image_name: &str) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (image_name, created_at)
            VALUES ($1, NOW())
            ON CONFLICT (image_name) DO NOTHING
            "#,
        )
        .bind(image_name)
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Write(e.to_string()))?;

        debug!(image_name = %image_name, "catalog entry upserted");
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_field(
        &self,
        image_name: &str,
        field: MetadataField,
        value: &str,
    ) -> Result<FieldUpdate, CatalogError> {
        // Column name comes from the typed field, never from input.
        let sql = format!(
            "UPDATE catalog_entries SET {} = $2 WHERE image_name = $1",
            column_name(field)
        );

        let result = sqlx::query(&sql)
            .bind(image_name)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| CatalogError::Write(e.to_string()))?;

        if result.rows_affected() == 0 {
            Ok(FieldUpdate::UnknownImage)
        } else {
            Ok(FieldUpdate::Applied)
        }
    }

    async fn get_entry(&self, image_name: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        sqlx::query_as::<_, CatalogEntry>(
            r#"
            SELECT image_name, caption, date, photographer, created_at
            FROM catalog_entries
            WHERE image_name = $1
            "#,
        )
        .bind(image_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Read(e.to_string()))
    }
}

/// In-memory catalog store for tests and embedded use.
#[derive(Default)]
pub struct MemoryCatalogStore {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently in the catalog.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn create_entry(&self, image_name: &str) -> Result<(), CatalogError> {
        let mut entries = self.entries.write().await;
        entries
            .entry(image_name.to_string())
            .or_insert_with(|| CatalogEntry {
                image_name: image_name.to_string(),
                caption: None,
                date: None,
                photographer: None,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn set_field(
        &self,
        image_name: &str,
        field: MetadataField,
        value: &str,
    ) -> Result<FieldUpdate, CatalogError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(image_name) {
            Some(entry) => {
                let value = Some(value.to_string());
                match field {
                    MetadataField::Caption => entry.caption = value,
                    MetadataField::Date => entry.date = value,
                    MetadataField::Photographer => entry.photographer = value,
                }
                Ok(FieldUpdate::Applied)
            }
            None => Ok(FieldUpdate::UnknownImage),
        }
    }

    async fn get_entry(&self, image_name: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.entries.read().await.get(image_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_entry_is_idempotent() {
        let store = MemoryCatalogStore::new();

        store.create_entry("vacation.png").await.unwrap();
        store
            .set_field("vacation.png", MetadataField::Caption, "Beach day")
            .await
            .unwrap();

        // Redelivered creation must not reset established fields
        store.create_entry("vacation.png").await.unwrap();

        assert_eq!(store.len().await, 1);
        let entry = store.get_entry("vacation.png").await.unwrap().unwrap();
        assert_eq!(entry.caption.as_deref(), Some("Beach day"));
    }

    #[tokio::test]
    async fn test_set_field_touches_only_one_field() {
        let store = MemoryCatalogStore::new();
        store.create_entry("vacation.png").await.unwrap();

        store
            .set_field("vacation.png", MetadataField::Photographer, "Ada")
            .await
            .unwrap();
        store
            .set_field("vacation.png", MetadataField::Date, "2023-05-01")
            .await
            .unwrap();

        let entry = store.get_entry("vacation.png").await.unwrap().unwrap();
        assert_eq!(entry.photographer.as_deref(), Some("Ada"));
        assert_eq!(entry.date.as_deref(), Some("2023-05-01"));
        assert_eq!(entry.caption, None);
    }

    #[tokio::test]
    async fn test_set_field_on_unknown_image_writes_nothing() {
        let store = MemoryCatalogStore::new();

        let outcome = store
            .set_field("missing.png", MetadataField::Caption, "nope")
            .await
            .unwrap();

        assert_eq!(outcome, FieldUpdate::UnknownImage);
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_column_names_match_schema() {
        assert_eq!(column_name(MetadataField::Caption), "caption");
        assert_eq!(column_name(MetadataField::Date), "date");
        assert_eq!(column_name(MetadataField::Photographer), "photographer");
    }
}
