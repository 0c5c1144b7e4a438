//! Scan-based version numbering.
//!
//! The next version is derived from the objects actually present, so there is
//! no counter to drift from reality. The scan alone is not safe under
//! concurrent writers; the versioned store pairs it with conditional puts.

use crate::{
    errors::VersioningResult,
    models::{
        bucket::{Bucket, BucketNames},
        object::ObjectEntry,
    },
    services::{gateway::ObjectStoreGateway, key_codec},
};
use std::sync::Arc;

/// A listed object that decodes to a version of the requested document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedEntry {
    pub bucket: Bucket,
    pub version: u64,
    pub object: ObjectEntry,
}

#[derive(Clone)]
pub struct VersionResolver {
    gateway: Arc<dyn ObjectStoreGateway>,
    buckets: BucketNames,
}

impl VersionResolver {
    pub fn new(gateway: Arc<dyn ObjectStoreGateway>, buckets: BucketNames) -> Self {
        Self { gateway, buckets }
    }

    /// Every stored version of `base_file_name` in `bucket`, in listing order.
    ///
    /// Keys under the version prefix that do not decode, or that decode to a
    /// different base name, are skipped.
    pub async fn versions(
        &self,
        base_file_name: &str,
        bucket: Bucket,
    ) -> VersioningResult<Vec<VersionedEntry>> {
        let prefix = key_codec::version_prefix(base_file_name);
        let listing = self
            .gateway
            .list(self.buckets.name(bucket), Some(&prefix), true)
            .await?;

        Ok(listing
            .into_iter()
            .filter_map(|object| match key_codec::decode(&object.key) {
                Ok((base, version)) if base == base_file_name => Some(VersionedEntry {
                    bucket,
                    version,
                    object,
                }),
                _ => None,
            })
            .collect())
    }

    /// `max(existing versions) + 1`, or `1` when there are none.
    pub async fn next_version(&self, base_file_name: &str, bucket: Bucket) -> VersioningResult<u64> {
        let versions = self.versions(base_file_name, bucket).await?;
        Ok(next_after(&versions))
    }
}

/// Version that follows the highest one in `entries`.
pub fn next_after(entries: &[VersionedEntry]) -> u64 {
    entries.iter().map(|e| e.version).max().unwrap_or(0) + 1
}
