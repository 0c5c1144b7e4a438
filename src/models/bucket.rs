//! Lifecycle buckets: the two fixed partitions a document version can live in.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// A logical partition of the object store.
///
/// Versioning is enforced independently inside each bucket's namespace; the
/// physical bucket name each variant maps to comes from [`BucketNames`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Ephemeral, in-progress documents.
    Working,
    /// Conservative default for everything not explicitly "working".
    Stable,
}

impl Bucket {
    /// Order in which buckets are probed when a key's location is unknown.
    pub const PROBE_ORDER: [Bucket; 2] = [Bucket::Working, Bucket::Stable];

    /// Canonical lifecycle label. Routing this label yields the same bucket.
    pub fn label(self) -> &'static str {
        match self {
            Bucket::Working => "working",
            Bucket::Stable => "stable",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Physical bucket names backing the two logical buckets.
#[derive(Clone, Debug)]
pub struct BucketNames {
    pub working: String,
    pub stable: String,
}

impl BucketNames {
    pub fn new(working: impl Into<String>, stable: impl Into<String>) -> Self {
        Self {
            working: working.into(),
            stable: stable.into(),
        }
    }

    /// Physical name for a logical bucket.
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Working => &self.working,
            Bucket::Stable => &self.stable,
        }
    }
}

impl Default for BucketNames {
    fn default() -> Self {
        Self::new("working", "stable")
    }
}

/// Row in the `buckets` table of the durable gateway.
#[derive(Clone, FromRow, Debug)]
pub struct BucketRecord {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Physical bucket name (must conform to DNS naming rules).
    pub name: String,
}
