//! ObjectStoreGateway: the narrow capability boundary the versioning layer
//! consumes. Two implementations exist: the durable [`StorageService`]
//! (SQLite + sharded disk) and the in-memory [`MemoryGateway`].
//!
//! [`StorageService`]: crate::services::storage_service::StorageService
//! [`MemoryGateway`]: crate::services::memory_gateway::MemoryGateway

use crate::models::object::{HeaderMap, ObjectEntry, ObjectStat, TagSet};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    AlreadyExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{key}` would carry {count} tags, at most {max} allowed")]
    TooManyTags { key: String, count: usize, max: usize },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte stream of an object's payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// How a `put` treats an existing object at the same key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PutMode {
    /// Replace whatever is there.
    #[default]
    Overwrite,
    /// Fail with [`StorageError::AlreadyExists`] if the key is taken.
    Create,
}

#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub mode: PutMode,
}

/// An object opened for reading.
pub struct ObjectBody {
    pub stat: ObjectStat,
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("stat", &self.stat)
            .finish_non_exhaustive()
    }
}

/// Bucket-addressed object store operations.
///
/// Buckets are physical names. Implementations must honour [`PutMode::Create`]
/// atomically: of two concurrent creates on one key, exactly one succeeds.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync + 'static {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Write an object and return what the store recorded for it.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StorageResult<ObjectStat>;

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody>;

    /// Fails with [`StorageError::ObjectNotFound`] when absent.
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat>;

    /// List objects whose key starts with `prefix`, in key order. Without
    /// `recursive`, keys containing `/` past the prefix are skipped.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        recursive: bool,
    ) -> StorageResult<Vec<ObjectEntry>>;

    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagSet>;

    /// Replace the object's tag set.
    async fn set_tags(&self, bucket: &str, key: &str, tags: TagSet) -> StorageResult<()>;

    async fn remove_tags(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Cheap readiness probe.
    async fn ping(&self) -> StorageResult<()>;
}

/// Shared key check for gateway implementations.
///
/// Rejects keys that are empty, too long, absolute, or that contain a `..`
/// segment, backslashes or control bytes.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Whether a listed key belongs in a non-recursive listing for `prefix`.
pub(crate) fn within_level(key: &str, prefix: Option<&str>) -> bool {
    let rest = prefix
        .and_then(|p| key.strip_prefix(p))
        .unwrap_or(key);
    !rest.contains('/')
}
