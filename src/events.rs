//! Domain events flowing through the catalog pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Routing attributes attached to a published event, matched against
/// subscriber filter policies.
pub type Attributes = HashMap<String, String>;

/// Attribute key carrying the metadata field name on metadata events.
pub const METADATA_TYPE_ATTRIBUTE: &str = "metadata_type";

/// Location of an uploaded object in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Bucket the object was uploaded to
    pub bucket: String,
    /// Decoded object key (percent-decoding applied, `+` normalized to space)
    pub key: String,
}

impl SourceLocation {
    /// The `s3://bucket/key` URI referenced in notifications.
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// One object-created notification from the upload source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    /// Where the uploaded object lives
    pub source: SourceLocation,
}

/// A request to set one metadata field on a catalog entry.
///
/// `field` is carried as the raw string from the transport; consumers
/// re-validate it against [`MetadataField`] before applying the update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEvent {
    /// Catalog entry the update targets
    pub image_name: String,
    /// Field name as received from the transport
    pub field: String,
    /// Value to set
    pub value: String,
}

/// Metadata fields that may be set on a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Caption,
    Date,
    Photographer,
}

impl MetadataField {
    /// All fields accepted by the metadata channel.
    pub const ALL: [MetadataField; 3] = [
        MetadataField::Caption,
        MetadataField::Date,
        MetadataField::Photographer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Caption => "Caption",
            MetadataField::Date => "Date",
            MetadataField::Photographer => "Photographer",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a metadata field name is not in the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metadata field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for MetadataField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Caption" => Ok(MetadataField::Caption),
            "Date" => Ok(MetadataField::Date),
            "Photographer" => Ok(MetadataField::Photographer),
            other => Err(UnknownField(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_uri() {
        let source = SourceLocation {
            bucket: "bucket1".to_string(),
            key: "vacation.png".to_string(),
        };
        assert_eq!(source.uri(), "s3://bucket1/vacation.png");
    }

    #[test]
    fn test_metadata_field_round_trip() {
        for field in MetadataField::ALL {
            assert_eq!(field.as_str().parse::<MetadataField>().unwrap(), field);
        }
    }

    #[test]
    fn test_metadata_field_rejects_unknown() {
        assert_eq!(
            "Location".parse::<MetadataField>(),
            Err(UnknownField("Location".to_string()))
        );
        // Matching is case-sensitive, like the transport filter
        assert!("caption".parse::<MetadataField>().is_err());
    }
}
