//! Sweep that strips a retired tag from every object in both buckets.

use crate::{
    errors::{BulkItemFailure, VersioningError, VersioningResult},
    models::{
        bucket::{Bucket, BucketNames},
        object::TagSet,
    },
    services::gateway::{ObjectStoreGateway, StorageResult},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a cascade sweep.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub scanned: usize,
    pub modified: usize,
    pub failures: Vec<BulkItemFailure>,
}

impl CascadeReport {
    pub fn into_result(self) -> VersioningResult<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        Err(VersioningError::PartialBulkFailure {
            operation: "remove tag",
            succeeded: self.scanned.saturating_sub(self.failures.len()),
            failures: self.failures,
        })
    }
}

#[derive(Clone)]
pub struct TagCascadeCoordinator {
    gateway: Arc<dyn ObjectStoreGateway>,
    buckets: BucketNames,
}

impl TagCascadeCoordinator {
    pub fn new(gateway: Arc<dyn ObjectStoreGateway>, buckets: BucketNames) -> Self {
        Self { gateway, buckets }
    }

    /// Remove every tag slot whose value equals `tag_name` (ignoring case)
    /// from every object. Remaining slots keep their names.
    ///
    /// Failures are recorded and skipped; the sweep always visits every
    /// object it can list.
    pub async fn remove_tag_everywhere(&self, tag_name: &str) -> CascadeReport {
        let mut report = CascadeReport::default();

        for bucket in Bucket::PROBE_ORDER {
            let physical = self.buckets.name(bucket);
            let objects = match self.gateway.list(physical, None, true).await {
                Ok(objects) => objects,
                Err(err) => {
                    warn!("cascade for `{}` could not list {}: {}", tag_name, physical, err);
                    report.failures.push(BulkItemFailure {
                        bucket: physical.to_string(),
                        key: "*".to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            for object in objects {
                report.scanned += 1;
                match self.strip(physical, &object.key, tag_name).await {
                    Ok(true) => report.modified += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!("cascade skipped {}/{}: {}", physical, object.key, err);
                        report.failures.push(BulkItemFailure {
                            bucket: physical.to_string(),
                            key: object.key,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "removed tag `{}` from {} of {} objects ({} failures)",
            tag_name,
            report.modified,
            report.scanned,
            report.failures.len()
        );
        report
    }

    async fn strip(&self, bucket: &str, key: &str, tag_name: &str) -> StorageResult<bool> {
        let tags = self.gateway.get_tags(bucket, key).await?;
        let kept: TagSet = tags
            .iter()
            .filter(|(_, value)| !value.eq_ignore_ascii_case(tag_name))
            .map(|(slot, value)| (slot.clone(), value.clone()))
            .collect();
        if kept.len() == tags.len() {
            return Ok(false);
        }

        debug!("{}/{}: {} -> {} tags", bucket, key, tags.len(), kept.len());
        if kept.is_empty() {
            self.gateway.remove_tags(bucket, key).await?;
        } else {
            self.gateway.set_tags(bucket, key, kept).await?;
        }
        Ok(true)
    }
}
