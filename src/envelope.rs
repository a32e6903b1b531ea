//! Transport envelope parsing.
//!
//! Upload and metadata notifications arrive as nested JSON: an outer queue
//! or topic record carries a serialized notification, whose `Message` body
//! in turn carries the actual payload. This module unwraps those layers into
//! typed domain events, treating "no storage records inside" as a skippable
//! record rather than an error.

use crate::events::{Attributes, MetadataEvent, SourceLocation, UploadEvent};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while decoding a transport envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed transport envelope: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    fn malformed(context: &str, err: impl std::fmt::Display) -> Self {
        EnvelopeError::Malformed(format!("{context}: {err}"))
    }
}

/// Result of decoding one transport record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRecord {
    /// A storage object was created
    Upload(UploadEvent),
    /// A metadata field update, with its routing attributes
    Metadata {
        event: MetadataEvent,
        attributes: Attributes,
    },
    /// The record carried no recognizable domain event; skip it
    Unrecognized,
}

// Outer queue delivery: a list of records whose bodies are serialized
// notifications.
#[derive(Debug, Deserialize)]
struct QueueEnvelope {
    #[serde(rename = "Records")]
    records: Vec<QueueRecord>,
}

#[derive(Debug, Deserialize)]
struct QueueRecord {
    body: String,
}

// Notification wrapper around the inner message.
#[derive(Debug, Deserialize)]
struct TopicMessage {
    #[serde(rename = "Message")]
    message: String,
}

// Topic delivery for the metadata channel.
#[derive(Debug, Deserialize)]
struct TopicEnvelope {
    #[serde(rename = "Records")]
    records: Vec<TopicRecord>,
}

#[derive(Debug, Deserialize)]
struct TopicRecord {
    #[serde(rename = "Sns")]
    notification: TopicNotification,
}

#[derive(Debug, Deserialize)]
struct TopicNotification {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "MessageAttributes", default)]
    attributes: HashMap<String, MessageAttribute>,
}

#[derive(Debug, Deserialize)]
struct MessageAttribute {
    #[serde(rename = "Value")]
    value: String,
}

// Storage-change event carried inside an upload notification.
#[derive(Debug, Deserialize)]
struct StorageChangeRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

// Inner message on the metadata channel.
#[derive(Debug, Deserialize)]
struct MetadataMessage {
    id: String,
    value: String,
}

/// Parse a raw upload transport payload into domain events.
///
/// Each record whose inner message carries a `Records` list yields one
/// [`ParsedRecord::Upload`] per storage-change record; inner messages
/// without the list yield [`ParsedRecord::Unrecognized`].
pub fn parse_upload_notification(raw: &str) -> Result<Vec<ParsedRecord>, EnvelopeError> {
    let envelope: QueueEnvelope = serde_json::from_str(raw)
        .map_err(|e| EnvelopeError::malformed("outer queue record", e))?;

    let mut parsed = Vec::new();
    for record in envelope.records {
        let notification: TopicMessage = serde_json::from_str(&record.body)
            .map_err(|e| EnvelopeError::malformed("notification body", e))?;

        let message: serde_json::Value = serde_json::from_str(&notification.message)
            .map_err(|e| EnvelopeError::malformed("inner message", e))?;

        // A message without a Records list carries no domain event.
        if message.get("Records").is_none() {
            parsed.push(ParsedRecord::Unrecognized);
            continue;
        }

        let change_records: Vec<StorageChangeRecord> =
            serde_json::from_value(message["Records"].clone())
                .map_err(|e| EnvelopeError::malformed("storage change records", e))?;

        for change in change_records {
            let key = decode_object_key(&change.s3.object.key)?;
            parsed.push(ParsedRecord::Upload(UploadEvent {
                source: SourceLocation {
                    bucket: change.s3.bucket.name,
                    key,
                },
            }));
        }
    }

    Ok(parsed)
}

/// Parse a raw metadata transport payload into domain events.
pub fn parse_metadata_notification(raw: &str) -> Result<Vec<ParsedRecord>, EnvelopeError> {
    let envelope: TopicEnvelope = serde_json::from_str(raw)
        .map_err(|e| EnvelopeError::malformed("outer topic record", e))?;

    let mut parsed = Vec::new();
    for record in envelope.records {
        let message: MetadataMessage = serde_json::from_str(&record.notification.message)
            .map_err(|e| EnvelopeError::malformed("metadata message", e))?;

        let attributes: Attributes = record
            .notification
            .attributes
            .into_iter()
            .map(|(name, attr)| (name, attr.value))
            .collect();

        let field = attributes
            .get(crate::events::METADATA_TYPE_ATTRIBUTE)
            .cloned()
            .unwrap_or_default();

        parsed.push(ParsedRecord::Metadata {
            event: MetadataEvent {
                image_name: message.id,
                field,
                value: message.value,
            },
            attributes,
        });
    }

    Ok(parsed)
}

/// Decode a percent-encoded object key, normalizing `+` to space first.
pub fn decode_object_key(raw: &str) -> Result<String, EnvelopeError> {
    let plus_normalized = raw.replace('+', " ");
    urlencoding::decode(&plus_normalized)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| EnvelopeError::malformed("object key encoding", e))
}
