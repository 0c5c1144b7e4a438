//! Object-level records exchanged with the object store gateway.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tag slot → tag value, as stored on a single object.
pub type TagSet = BTreeMap<String, String>;

/// Flat, string-keyed header map attached to an object at write time.
pub type HeaderMap = BTreeMap<String, String>;

/// Maximum tags a single object may carry.
pub const MAX_TAGS_PER_OBJECT: usize = 10;

/// Row in the `objects` table of the durable gateway.
///
/// Holds metadata only; the payload lives on disk beneath the bucket root.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key within the bucket.
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: String,

    /// Timestamp when the object was written.
    pub last_modified: DateTime<Utc>,
}

/// One entry of a bucket listing.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

/// Everything the store knows about an object, short of its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    pub etag: String,
    pub headers: HeaderMap,
}

impl From<ObjectRecord> for ObjectEntry {
    fn from(record: ObjectRecord) -> Self {
        Self {
            key: record.key,
            size: record.size_bytes.max(0) as u64,
            last_modified: record.last_modified,
            etag: record.etag,
        }
    }
}

impl ObjectRecord {
    pub fn into_stat(self, headers: HeaderMap) -> ObjectStat {
        ObjectStat {
            key: self.key,
            size: self.size_bytes.max(0) as u64,
            last_modified: self.last_modified,
            content_type: self.content_type,
            etag: self.etag,
            headers,
        }
    }
}
