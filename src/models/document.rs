//! Document-level records returned by the versioned store.

use super::{bucket::Bucket, metadata::StructuredMetadata, object::TagSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Authenticated identity of the caller, resolved upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author(String);

impl Author {
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete, immutable stored revision of a logical document.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    #[serde(rename = "versionedFileName")]
    pub versioned_key: String,
    pub base_file_name: String,
    pub version: u64,
    pub bucket: Bucket,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    pub etag: String,
    pub tags: TagSet,
    pub metadata: StructuredMetadata,
}

/// Result of a successful write. A failed tag write after the object landed is
/// reported in `tag_warning` instead of failing the upload.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    #[serde(flatten)]
    pub version: DocumentVersion,
    #[serde(rename = "warning", skip_serializing_if = "Option::is_none")]
    pub tag_warning: Option<String>,
}
