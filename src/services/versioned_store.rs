//! VersionedStore: upload, new-version, download, enumerate and delete
//! operations over immutable document versions.
//!
//! Every write goes through a conditional (`PutMode::Create`) put. When
//! another writer claims the computed key first, the version is re-resolved
//! and the write retried, up to `max_version_attempts` times.

use crate::{
    errors::{BulkItemFailure, VersioningError, VersioningResult},
    models::{
        bucket::{Bucket, BucketNames},
        document::{Author, DocumentVersion, UploadOutcome},
        metadata::{MetadataFields, StructuredMetadata},
        object::{MAX_TAGS_PER_OBJECT, ObjectStat, TagSet},
    },
    services::{
        bucket_router,
        gateway::{ObjectBody, ObjectStoreGateway, PutMode, PutOptions, StorageError},
        key_codec, metadata_codec,
        version_resolver::{VersionResolver, VersionedEntry, next_after},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payload of a new version.
#[derive(Clone, Debug)]
pub struct DocumentContent {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl DocumentContent {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }
}

/// An object opened for download, with the bucket it was found in.
#[derive(Debug)]
pub struct Download {
    pub bucket: Bucket,
    pub body: ObjectBody,
}

#[derive(Clone)]
pub struct VersionedStore {
    gateway: Arc<dyn ObjectStoreGateway>,
    buckets: BucketNames,
    resolver: VersionResolver,
    max_version_attempts: u32,
}

impl VersionedStore {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        buckets: BucketNames,
        max_version_attempts: u32,
    ) -> Self {
        Self {
            resolver: VersionResolver::new(gateway.clone(), buckets.clone()),
            gateway,
            buckets,
            max_version_attempts: max_version_attempts.max(1),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ObjectStoreGateway> {
        &self.gateway
    }

    /// Create both physical buckets if missing.
    pub async fn ensure_buckets(&self) -> VersioningResult<()> {
        for bucket in Bucket::PROBE_ORDER {
            self.gateway.ensure_bucket(self.buckets.name(bucket)).await?;
        }
        Ok(())
    }

    /// Store the first revision of a logical document.
    ///
    /// The bucket comes from `lifecycle_category`. A fresh document gets
    /// version 1; if versions already exist under the same name the scan is
    /// trusted and the next free number is used.
    pub async fn upload_new(
        &self,
        base_file_name: &str,
        content: DocumentContent,
        lifecycle_category: Option<&str>,
        fields: MetadataFields,
        tags: &[String],
        author: &Author,
    ) -> VersioningResult<UploadOutcome> {
        key_codec::validate_base_name(base_file_name)?;
        let tags = slot_tags(tags)?;

        let category = lifecycle_category.map(str::trim).unwrap_or_default();
        let bucket = bucket_router::route(category);

        let mut metadata = fields.into_metadata();
        metadata.lifecycle_category = Some(if category.is_empty() {
            bucket.label().to_string()
        } else {
            category.to_string()
        });
        metadata.date_created = Some(Utc::now());
        metadata.created_by = Some(author.to_string());

        let outcome = self
            .write_version(base_file_name, bucket, 1, content, metadata, tags)
            .await?;
        if outcome.version.version != 1 {
            warn!(
                "upload of new document {} landed as version {}; earlier versions already exist in {}",
                base_file_name, outcome.version.version, bucket
            );
        }
        Ok(outcome)
    }

    /// Store a further revision of an existing logical document.
    ///
    /// The document stays in the bucket holding its versions (Working wins if
    /// both do) unless `fields` carries a lifecycle category. The new version
    /// number is above every existing version in either bucket.
    pub async fn create_version(
        &self,
        base_file_name: &str,
        content: DocumentContent,
        fields: MetadataFields,
        tags: &[String],
        author: &Author,
    ) -> VersioningResult<UploadOutcome> {
        key_codec::validate_base_name(base_file_name)?;
        let tags = slot_tags(tags)?;

        let mut prior = Vec::new();
        let mut current = None;
        for bucket in Bucket::PROBE_ORDER {
            let versions = self.resolver.versions(base_file_name, bucket).await?;
            if current.is_none() && !versions.is_empty() {
                current = Some(bucket);
            }
            prior.extend(versions);
        }
        let current = current
            .ok_or_else(|| VersioningError::LogicalDocumentNotFound(base_file_name.to_string()))?;

        let bucket = fields.category().map(bucket_router::route).unwrap_or(current);
        if bucket != current {
            info!("moving {} from {} to {}", base_file_name, current, bucket);
        }

        let category = fields.category().map(str::to_string);
        let now = Utc::now();
        let mut metadata = fields.into_metadata();
        metadata.lifecycle_category = Some(category.unwrap_or_else(|| bucket.label().to_string()));
        metadata.date_created = Some(now);
        metadata.created_by = Some(author.to_string());
        metadata.date_updated = Some(now);
        metadata.updated_by = Some(author.to_string());

        self.write_version(base_file_name, bucket, next_after(&prior), content, metadata, tags)
            .await
    }

    /// Open a specific version for reading.
    pub async fn download(&self, versioned_key: &str) -> VersioningResult<Download> {
        key_codec::decode(versioned_key)?;
        let (bucket, _) = self.locate(versioned_key).await?;
        self.open(bucket, versioned_key).await
    }

    /// Open the highest-numbered version of a logical document.
    pub async fn download_latest(&self, base_file_name: &str) -> VersioningResult<Download> {
        key_codec::validate_base_name(base_file_name)?;
        let latest = self
            .all_versions(base_file_name)
            .await?
            .into_iter()
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then(a.object.last_modified.cmp(&b.object.last_modified))
            })
            .ok_or_else(|| VersioningError::NoVersionsFound(base_file_name.to_string()))?;
        self.open(latest.bucket, &latest.object.key).await
    }

    /// Every version of a logical document, newest version first.
    ///
    /// Versions deleted between listing and inspection are left out; tag
    /// lookups that fail leave that version's tags empty.
    pub async fn list_versions(
        &self,
        base_file_name: &str,
    ) -> VersioningResult<Vec<DocumentVersion>> {
        key_codec::validate_base_name(base_file_name)?;
        let mut entries = self.all_versions(base_file_name).await?;
        entries.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then(b.object.last_modified.cmp(&a.object.last_modified))
        });

        let mut versions = Vec::with_capacity(entries.len());
        for entry in entries {
            let physical = self.buckets.name(entry.bucket);
            let stat = match self.gateway.stat(physical, &entry.object.key).await {
                Ok(stat) => stat,
                Err(StorageError::ObjectNotFound { .. }) => {
                    debug!("{} vanished while listing versions", entry.object.key);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let tags = match self.gateway.get_tags(physical, &entry.object.key).await {
                Ok(tags) => tags,
                Err(err) => {
                    warn!("could not read tags of {}: {}", entry.object.key, err);
                    TagSet::new()
                }
            };
            versions.push(document_version(
                base_file_name,
                entry.version,
                entry.bucket,
                stat,
                tags,
            ));
        }
        Ok(versions)
    }

    /// Remove exactly one version.
    pub async fn delete_version(&self, versioned_key: &str) -> VersioningResult<()> {
        key_codec::decode(versioned_key)?;
        let (bucket, _) = self.locate(versioned_key).await?;
        self.gateway
            .delete(self.buckets.name(bucket), versioned_key)
            .await
            .map_err(|err| not_found_or(versioned_key, err))?;
        info!("deleted {} from {}", versioned_key, bucket);
        Ok(())
    }

    /// Remove every version in both buckets, one at a time.
    ///
    /// Not transactional: when some deletes fail the rest still happen and
    /// the call reports [`VersioningError::PartialBulkFailure`].
    pub async fn delete_all_versions(&self, base_file_name: &str) -> VersioningResult<usize> {
        key_codec::validate_base_name(base_file_name)?;
        let entries = self.all_versions(base_file_name).await?;
        if entries.is_empty() {
            return Err(VersioningError::NoVersionsFound(base_file_name.to_string()));
        }

        let mut deleted = 0;
        let mut failures = Vec::new();
        for entry in entries {
            let physical = self.buckets.name(entry.bucket);
            match self.gateway.delete(physical, &entry.object.key).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!("failed to delete {}/{}: {}", physical, entry.object.key, err);
                    failures.push(BulkItemFailure {
                        bucket: physical.to_string(),
                        key: entry.object.key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(VersioningError::PartialBulkFailure {
                operation: "delete all versions",
                succeeded: deleted,
                failures,
            });
        }
        info!("deleted {} versions of {}", deleted, base_file_name);
        Ok(deleted)
    }

    pub async fn get_tags(&self, versioned_key: &str) -> VersioningResult<TagSet> {
        key_codec::decode(versioned_key)?;
        let (bucket, _) = self.locate(versioned_key).await?;
        self.gateway
            .get_tags(self.buckets.name(bucket), versioned_key)
            .await
            .map_err(|err| tag_failure(versioned_key, err))
    }

    /// Replace a version's tags with `tags`, slotted in order.
    pub async fn set_tags(&self, versioned_key: &str, tags: &[String]) -> VersioningResult<TagSet> {
        key_codec::decode(versioned_key)?;
        let tags = slot_tags(tags)?;
        let (bucket, _) = self.locate(versioned_key).await?;
        self.gateway
            .set_tags(self.buckets.name(bucket), versioned_key, tags.clone())
            .await
            .map_err(|err| tag_failure(versioned_key, err))?;
        Ok(tags)
    }

    pub async fn delete_tags(&self, versioned_key: &str) -> VersioningResult<()> {
        key_codec::decode(versioned_key)?;
        let (bucket, _) = self.locate(versioned_key).await?;
        self.gateway
            .remove_tags(self.buckets.name(bucket), versioned_key)
            .await
            .map_err(|err| tag_failure(versioned_key, err))
    }

    /// Claim the next free version in `bucket` (never below `floor`) and
    /// write it, then apply tags.
    async fn write_version(
        &self,
        base_file_name: &str,
        bucket: Bucket,
        floor: u64,
        content: DocumentContent,
        metadata: StructuredMetadata,
        tags: TagSet,
    ) -> VersioningResult<UploadOutcome> {
        let physical = self.buckets.name(bucket);
        let headers = metadata_codec::encode(&metadata);

        for attempt in 1..=self.max_version_attempts {
            let version = self
                .resolver
                .next_version(base_file_name, bucket)
                .await?
                .max(floor);
            let key = key_codec::encode(base_file_name, version);
            let options = PutOptions {
                content_type: content.content_type.clone(),
                headers: headers.clone(),
                mode: PutMode::Create,
            };

            let stat = match self
                .gateway
                .put(physical, &key, content.bytes.clone(), options)
                .await
            {
                Ok(stat) => stat,
                Err(StorageError::AlreadyExists { .. }) => {
                    warn!(
                        "{}/{} was claimed concurrently (attempt {}/{}), re-resolving",
                        physical, key, attempt, self.max_version_attempts
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            info!(
                "stored {} in {} for {}",
                key,
                bucket,
                metadata.updated_by.as_deref().or(metadata.created_by.as_deref()).unwrap_or("-")
            );

            let (tags, tag_warning) = self.apply_tags(physical, &key, tags).await;
            return Ok(UploadOutcome {
                version: document_version(base_file_name, version, bucket, stat, tags),
                tag_warning,
            });
        }

        Err(VersioningError::VersionConflict {
            base_file_name: base_file_name.to_string(),
            attempts: self.max_version_attempts,
        })
    }

    /// Tag a freshly written object. Failure is downgraded to a warning.
    async fn apply_tags(&self, bucket: &str, key: &str, tags: TagSet) -> (TagSet, Option<String>) {
        if tags.is_empty() {
            return (tags, None);
        }
        match self.gateway.set_tags(bucket, key, tags.clone()).await {
            Ok(()) => (tags, None),
            Err(err) => {
                let err = tag_failure(key, err);
                warn!("{}; the upload itself succeeded", err);
                (TagSet::new(), Some(err.to_string()))
            }
        }
    }

    /// Find which bucket holds `versioned_key`, probing Working first.
    async fn locate(&self, versioned_key: &str) -> VersioningResult<(Bucket, ObjectStat)> {
        for bucket in Bucket::PROBE_ORDER {
            match self
                .gateway
                .stat(self.buckets.name(bucket), versioned_key)
                .await
            {
                Ok(stat) => return Ok((bucket, stat)),
                Err(StorageError::ObjectNotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(VersioningError::NotFound(versioned_key.to_string()))
    }

    async fn open(&self, bucket: Bucket, versioned_key: &str) -> VersioningResult<Download> {
        let body = self
            .gateway
            .get(self.buckets.name(bucket), versioned_key)
            .await
            .map_err(|err| not_found_or(versioned_key, err))?;
        Ok(Download { bucket, body })
    }

    async fn all_versions(&self, base_file_name: &str) -> VersioningResult<Vec<VersionedEntry>> {
        let mut entries = Vec::new();
        for bucket in Bucket::PROBE_ORDER {
            entries.extend(self.resolver.versions(base_file_name, bucket).await?);
        }
        Ok(entries)
    }
}

/// Assign caller tags to slots `tag1..`, dropping blanks and repeats
/// (case-insensitive, first occurrence wins).
pub fn slot_tags(tags: &[String]) -> VersioningResult<TagSet> {
    let mut kept: Vec<&str> = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !kept.iter().any(|k| k.eq_ignore_ascii_case(tag)) {
            kept.push(tag);
        }
    }
    if kept.len() > MAX_TAGS_PER_OBJECT {
        return Err(VersioningError::TooManyTags {
            count: kept.len(),
            max: MAX_TAGS_PER_OBJECT,
        });
    }
    Ok(kept
        .into_iter()
        .enumerate()
        .map(|(idx, tag)| (format!("tag{}", idx + 1), tag.to_string()))
        .collect())
}

fn document_version(
    base_file_name: &str,
    version: u64,
    bucket: Bucket,
    stat: ObjectStat,
    tags: TagSet,
) -> DocumentVersion {
    DocumentVersion {
        metadata: metadata_codec::decode(&stat.headers),
        versioned_key: stat.key,
        base_file_name: base_file_name.to_string(),
        version,
        bucket,
        size: stat.size,
        last_modified: stat.last_modified,
        content_type: stat.content_type,
        etag: stat.etag,
        tags,
    }
}

fn not_found_or(versioned_key: &str, err: StorageError) -> VersioningError {
    match err {
        StorageError::ObjectNotFound { .. } => VersioningError::NotFound(versioned_key.to_string()),
        other => other.into(),
    }
}

fn tag_failure(versioned_key: &str, err: StorageError) -> VersioningError {
    match err {
        StorageError::ObjectNotFound { .. } => VersioningError::NotFound(versioned_key.to_string()),
        StorageError::TooManyTags { count, max, .. } => VersioningError::TooManyTags { count, max },
        other => VersioningError::TagOperationFailed {
            key: versioned_key.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::object::ObjectEntry,
        services::{
            gateway::{ByteStream, StorageResult},
            memory_gateway::{Fault, MemoryGateway},
            storage_service::StorageService,
        },
    };
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn store_on(gateway: Arc<dyn ObjectStoreGateway>) -> VersionedStore {
        let store = VersionedStore::new(gateway, BucketNames::default(), 5);
        store.ensure_buckets().await.unwrap();
        store
    }

    async fn memory_store() -> (VersionedStore, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::new());
        (store_on(gateway.clone()).await, gateway)
    }

    fn pdf(bytes: &'static [u8]) -> DocumentContent {
        DocumentContent::new(Bytes::from_static(bytes), Some("application/pdf".into()))
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn read_all(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    async fn keys_in(gateway: &MemoryGateway, bucket: &str) -> Vec<String> {
        gateway
            .list(bucket, None, true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect()
    }

    #[tokio::test]
    async fn upload_new_places_working_document_at_version_one() {
        let (store, gateway) = memory_store().await;
        let ada = Author::new("ada@example.com");

        let outcome = store
            .upload_new("invoice.pdf", pdf(b"v1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        let v1 = outcome.version;
        assert_eq!(v1.versioned_key, "invoice_v1.pdf");
        assert_eq!(v1.version, 1);
        assert_eq!(v1.bucket, Bucket::Working);
        assert_eq!(v1.metadata.created_by.as_deref(), Some("ada@example.com"));
        assert!(v1.metadata.date_created.is_some());
        assert_eq!(v1.metadata.updated_by, None);
        assert_eq!(v1.metadata.lifecycle_category.as_deref(), Some("working"));
        assert!(outcome.tag_warning.is_none());
        assert_eq!(keys_in(&gateway, "working").await, vec!["invoice_v1.pdf"]);
    }

    #[tokio::test]
    async fn upload_without_category_defaults_to_stable() {
        let (store, _) = memory_store().await;
        let outcome = store
            .upload_new(
                "notes.txt",
                pdf(b"x"),
                None,
                MetadataFields::default(),
                &[],
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.version.bucket, Bucket::Stable);
        assert_eq!(outcome.version.metadata.lifecycle_category.as_deref(), Some("stable"));
    }

    #[tokio::test]
    async fn create_version_stays_in_bucket_and_stamps_its_own_author() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        let bob = Author::new("bob@example.com");
        let v1 = store
            .upload_new("invoice.pdf", pdf(b"v1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap()
            .version;

        let fields = MetadataFields {
            reviewed_by: Some("grace@example.com".into()),
            ..MetadataFields::default()
        };
        let v2 = store
            .create_version("invoice.pdf", pdf(b"v2"), fields, &[], &bob)
            .await
            .unwrap()
            .version;

        assert_eq!(v2.versioned_key, "invoice_v2.pdf");
        assert_eq!(v2.bucket, Bucket::Working);
        assert_eq!(v2.metadata.updated_by.as_deref(), Some("bob@example.com"));
        assert_eq!(v2.metadata.created_by.as_deref(), Some("bob@example.com"));
        assert_ne!(v2.metadata.date_created, v1.metadata.date_created);
        assert_eq!(v2.metadata.reviewed_by.as_deref(), Some("grace@example.com"));
        assert_eq!(v2.metadata.lifecycle_category.as_deref(), Some("working"));
    }

    #[tokio::test]
    async fn sequential_versions_count_up_from_two() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("plan.docx", pdf(b"0"), Some("stable"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        let mut produced = Vec::new();
        for _ in 0..5 {
            let outcome = store
                .create_version("plan.docx", pdf(b"n"), MetadataFields::default(), &[], &ada)
                .await
                .unwrap();
            produced.push(outcome.version.version);
        }
        assert_eq!(produced, vec![2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn create_version_requires_a_prior_version() {
        let (store, _) = memory_store().await;
        let err = store
            .create_version(
                "ghost.pdf",
                pdf(b"x"),
                MetadataFields::default(),
                &[],
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::LogicalDocumentNotFound(name) if name == "ghost.pdf"));
    }

    #[tokio::test]
    async fn category_override_moves_document_without_reusing_numbers() {
        let (store, gateway) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("design.md", pdf(b"1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();
        store
            .create_version("design.md", pdf(b"2"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        let promote = MetadataFields {
            lifecycle_category: Some("Released".into()),
            ..MetadataFields::default()
        };
        let v3 = store
            .create_version("design.md", pdf(b"3"), promote, &[], &ada)
            .await
            .unwrap()
            .version;

        assert_eq!(v3.bucket, Bucket::Stable);
        assert_eq!(v3.version, 3);
        assert_eq!(v3.metadata.lifecycle_category.as_deref(), Some("Released"));
        assert_eq!(keys_in(&gateway, "stable").await, vec!["design_v3.md"]);

        let latest = store.download_latest("design.md").await.unwrap();
        assert_eq!(latest.bucket, Bucket::Stable);
        assert_eq!(read_all(latest.body.stream).await, b"3");
    }

    #[tokio::test]
    async fn upload_new_trusts_the_scan_on_name_collision() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        for _ in 0..2 {
            store
                .upload_new("dup.txt", pdf(b"x"), Some("working"), MetadataFields::default(), &[], &ada)
                .await
                .unwrap();
        }
        let versions = store.list_versions("dup.txt").await.unwrap();
        let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn download_latest_returns_highest_version() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("invoice.pdf", pdf(b"one"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();
        for body in [&b"two"[..], &b"three"[..]] {
            store
                .create_version(
                    "invoice.pdf",
                    DocumentContent::new(Bytes::copy_from_slice(body), None),
                    MetadataFields::default(),
                    &[],
                    &ada,
                )
                .await
                .unwrap();
        }

        let latest = store.download_latest("invoice.pdf").await.unwrap();
        assert_eq!(latest.body.stat.key, "invoice_v3.pdf");
        assert_eq!(read_all(latest.body.stream).await, b"three");

        let err = store.download_latest("nothing.pdf").await.unwrap_err();
        assert!(matches!(err, VersioningError::NoVersionsFound(_)));
    }

    #[tokio::test]
    async fn download_probes_both_buckets() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("a.txt", pdf(b"stable"), Some("stable"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        let found = store.download("a_v1.txt").await.unwrap();
        assert_eq!(found.bucket, Bucket::Stable);
        assert_eq!(read_all(found.body.stream).await, b"stable");

        assert!(matches!(
            store.download("a_v2.txt").await.unwrap_err(),
            VersioningError::NotFound(_)
        ));
        assert!(matches!(
            store.download("a.txt").await.unwrap_err(),
            VersioningError::MalformedKey(_)
        ));
    }

    #[tokio::test]
    async fn list_versions_after_deleting_one_of_three() {
        let (store, _) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("r.pdf", pdf(b"1"), Some("working"), MetadataFields::default(), &["Draft".into()], &ada)
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .create_version("r.pdf", pdf(b"n"), MetadataFields::default(), &[], &ada)
                .await
                .unwrap();
        }

        store.delete_version("r_v2.pdf").await.unwrap();

        let versions = store.list_versions("r.pdf").await.unwrap();
        let keys: Vec<&str> = versions.iter().map(|v| v.versioned_key.as_str()).collect();
        assert_eq!(keys, vec!["r_v3.pdf", "r_v1.pdf"]);
        assert_eq!(versions[1].tags["tag1"], "Draft");
        assert_eq!(versions[1].metadata.created_by.as_deref(), Some("ada@example.com"));

        assert!(matches!(
            store.delete_version("r_v2.pdf").await.unwrap_err(),
            VersioningError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_all_versions_clears_both_buckets_only_for_that_document() {
        let (store, gateway) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("doc.pdf", pdf(b"1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();
        store
            .create_version("doc.pdf", pdf(b"2"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();
        let to_stable = MetadataFields {
            lifecycle_category: Some("stable".into()),
            ..MetadataFields::default()
        };
        store
            .create_version("doc.pdf", pdf(b"3"), to_stable, &[], &ada)
            .await
            .unwrap();
        store
            .upload_new("other.pdf", pdf(b"o"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        assert_eq!(store.delete_all_versions("doc.pdf").await.unwrap(), 3);

        for bucket in ["working", "stable"] {
            for key in keys_in(&gateway, bucket).await {
                let decoded = key_codec::decode(&key).map(|(base, _)| base).ok();
                assert_ne!(decoded.as_deref(), Some("doc.pdf"));
            }
        }
        assert_eq!(keys_in(&gateway, "working").await, vec!["other_v1.pdf"]);
        assert!(matches!(
            store.delete_all_versions("doc.pdf").await.unwrap_err(),
            VersioningError::NoVersionsFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_all_versions_reports_partial_failure_without_rollback() {
        let (store, gateway) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("doc.pdf", pdf(b"1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .create_version("doc.pdf", pdf(b"n"), MetadataFields::default(), &[], &ada)
                .await
                .unwrap();
        }
        gateway.fail_on(Fault::Delete, "doc_v2.pdf");

        match store.delete_all_versions("doc.pdf").await.unwrap_err() {
            VersioningError::PartialBulkFailure {
                succeeded, failures, ..
            } => {
                assert_eq!(succeeded, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].key, "doc_v2.pdf");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(keys_in(&gateway, "working").await, vec!["doc_v2.pdf"]);
    }

    #[tokio::test]
    async fn tag_failure_is_a_warning_not_an_upload_failure() {
        let (store, gateway) = memory_store().await;
        gateway.fail_on(Fault::SetTags, "invoice_v1.pdf");

        let outcome = store
            .upload_new(
                "invoice.pdf",
                pdf(b"v1"),
                Some("working"),
                MetadataFields::default(),
                &tags(&["Finance"]),
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap();

        assert!(outcome.tag_warning.as_deref().unwrap().contains("invoice_v1.pdf"));
        assert!(outcome.version.tags.is_empty());
        assert!(store.download("invoice_v1.pdf").await.is_ok());
    }

    #[tokio::test]
    async fn too_many_tags_are_rejected_before_writing() {
        let (store, gateway) = memory_store().await;
        let many: Vec<String> = (0..11).map(|i| format!("t{i}")).collect();
        let err = store
            .upload_new(
                "a.txt",
                pdf(b"x"),
                Some("working"),
                MetadataFields::default(),
                &many,
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::TooManyTags { count: 11, max: 10 }));
        assert!(keys_in(&gateway, "working").await.is_empty());
    }

    #[tokio::test]
    async fn tag_operations_follow_the_object() {
        let (store, _) = memory_store().await;
        store
            .upload_new(
                "a.txt",
                pdf(b"x"),
                Some("stable"),
                MetadataFields::default(),
                &tags(&["Draft"]),
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap();

        let replaced = store
            .set_tags("a_v1.txt", &tags(&["Final", " final ", "", "Legal"]))
            .await
            .unwrap();
        assert_eq!(
            replaced,
            TagSet::from([
                ("tag1".to_string(), "Final".to_string()),
                ("tag2".to_string(), "Legal".to_string()),
            ])
        );
        assert_eq!(store.get_tags("a_v1.txt").await.unwrap(), replaced);

        store.delete_tags("a_v1.txt").await.unwrap();
        assert!(store.get_tags("a_v1.txt").await.unwrap().is_empty());
        assert!(matches!(
            store.get_tags("b_v1.txt").await.unwrap_err(),
            VersioningError::NotFound(_)
        ));
    }

    #[test]
    fn slot_tags_dedupes_case_insensitively() {
        let slotted = slot_tags(&tags(&["Draft", "draft", "HR"])).unwrap();
        assert_eq!(slotted.len(), 2);
        assert_eq!(slotted["tag1"], "Draft");
        assert_eq!(slotted["tag2"], "HR");
    }

    /// Gateway wrapper where another writer grabs the target key right
    /// before each of the first `races` conditional puts.
    struct RacingGateway {
        inner: MemoryGateway,
        races: AtomicU32,
    }

    #[async_trait]
    impl ObjectStoreGateway for RacingGateway {
        async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
            self.inner.ensure_bucket(bucket).await
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            options: PutOptions,
        ) -> StorageResult<ObjectStat> {
            let racing = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if options.mode == PutMode::Create && racing {
                self.inner
                    .put(bucket, key, Bytes::from_static(b"rival"), PutOptions::default())
                    .await?;
            }
            self.inner.put(bucket, key, body, options).await
        }

        async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
            self.inner.get(bucket, key).await
        }

        async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
            self.inner.stat(bucket, key).await
        }

        async fn list(
            &self,
            bucket: &str,
            prefix: Option<&str>,
            recursive: bool,
        ) -> StorageResult<Vec<ObjectEntry>> {
            self.inner.list(bucket, prefix, recursive).await
        }

        async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagSet> {
            self.inner.get_tags(bucket, key).await
        }

        async fn set_tags(&self, bucket: &str, key: &str, tags: TagSet) -> StorageResult<()> {
            self.inner.set_tags(bucket, key, tags).await
        }

        async fn remove_tags(&self, bucket: &str, key: &str) -> StorageResult<()> {
            self.inner.remove_tags(bucket, key).await
        }

        async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
            self.inner.delete(bucket, key).await
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    fn racing(races: u32) -> Arc<RacingGateway> {
        Arc::new(RacingGateway {
            inner: MemoryGateway::new(),
            races: AtomicU32::new(races),
        })
    }

    #[tokio::test]
    async fn lost_race_retries_with_a_fresh_version() {
        let gateway = racing(2);
        let store = store_on(gateway.clone()).await;

        let outcome = store
            .upload_new(
                "race.txt",
                pdf(b"mine"),
                Some("working"),
                MetadataFields::default(),
                &[],
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.version.version, 3);
        let rival = store.download("race_v1.txt").await.unwrap();
        assert_eq!(read_all(rival.body.stream).await, b"rival");
        let mine = store.download("race_v3.txt").await.unwrap();
        assert_eq!(read_all(mine.body.stream).await, b"mine");
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_as_version_conflict() {
        let gateway = racing(u32::MAX);
        let store = store_on(gateway).await;

        let err = store
            .upload_new(
                "race.txt",
                pdf(b"mine"),
                Some("working"),
                MetadataFields::default(),
                &[],
                &Author::new("ada@example.com"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::VersionConflict { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn concurrent_new_versions_never_overwrite_each_other() {
        let (store, gateway) = memory_store().await;
        let ada = Author::new("ada@example.com");
        store
            .upload_new("c.txt", pdf(b"1"), Some("working"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let ada = ada.clone();
                tokio::spawn(async move {
                    store
                        .create_version("c.txt", pdf(b"n"), MetadataFields::default(), &[], &ada)
                        .await
                })
            })
            .collect();
        let mut produced = Vec::new();
        for handle in handles {
            produced.push(handle.await.unwrap().unwrap().version.version);
        }
        produced.sort_unstable();
        assert_eq!(produced, vec![2, 3, 4, 5]);
        assert_eq!(keys_in(&gateway, "working").await.len(), 5);
    }

    #[tokio::test]
    async fn works_end_to_end_on_the_durable_gateway() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = db::connect_in_memory().await.unwrap();
        let gateway = Arc::new(StorageService::new(Arc::new(pool), dir.path()));
        let store = store_on(gateway).await;
        let ada = Author::new("ada@example.com");

        store
            .upload_new(
                "invoice.pdf",
                pdf(b"one"),
                Some("working"),
                MetadataFields::default(),
                &tags(&["Finance"]),
                &ada,
            )
            .await
            .unwrap();
        let v2 = store
            .create_version("invoice.pdf", pdf(b"two"), MetadataFields::default(), &[], &ada)
            .await
            .unwrap()
            .version;
        assert_eq!(v2.versioned_key, "invoice_v2.pdf");

        let versions = store.list_versions("invoice.pdf").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].tags["tag1"], "Finance");
        assert!(versions[0].metadata.date_updated.is_some());

        let latest = store.download_latest("invoice.pdf").await.unwrap();
        assert_eq!(read_all(latest.body.stream).await, b"two");
        assert_eq!(
            latest.body.stat.headers.get(metadata_codec::CREATED_BY),
            Some(&"ada@example.com".to_string())
        );
    }
}
