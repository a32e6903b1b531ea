//! Object storage access, limited to the existence probe the cataloger
//! needs to confirm an uploaded object is retrievable.

use crate::config::StorageConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Errors surfaced by object stores.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("storage request failed: {0}")]
    Request(String),
}

/// Read-side interface over the upload bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that the object is retrievable.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError>;
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(region = %config.region, "S3 object store initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::Request(e.to_string()))
                }
            }
        }
    }
}

/// In-memory object store for tests and embedded use.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashSet<(String, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object as present.
    pub async fn put(&self, bucket: &str, key: &str) {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()));
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .await
            .contains(&(bucket.to_string(), key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_tracks_objects() {
        let store = MemoryObjectStore::new();
        store.put("bucket1", "vacation.png").await;

        assert!(store.exists("bucket1", "vacation.png").await.unwrap());
        assert!(!store.exists("bucket1", "missing.png").await.unwrap());
        assert!(!store.exists("bucket2", "vacation.png").await.unwrap());
    }
}
