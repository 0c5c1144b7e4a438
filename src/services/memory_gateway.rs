//! In-memory [`ObjectStoreGateway`] used by tests and the ephemeral
//! `--backend memory` mode. Nothing survives a restart.

use crate::{
    models::object::{MAX_TAGS_PER_OBJECT, ObjectEntry, ObjectStat, TagSet},
    services::gateway::{
        ObjectBody, ObjectStoreGateway, PutMode, PutOptions, StorageError, StorageResult,
        ensure_key_safe, within_level,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap},
    io,
};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    stat: ObjectStat,
    tags: TagSet,
}

type BucketMap = HashMap<String, BTreeMap<String, StoredObject>>;

/// Operations a test can make fail for a given key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    GetTags,
    SetTags,
    Delete,
}

#[derive(Default)]
pub struct MemoryGateway {
    buckets: RwLock<BucketMap>,
    #[cfg(test)]
    faults: std::sync::Mutex<std::collections::HashSet<(Fault, String)>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `fault` operation on `key` fail with an I/O error.
    #[cfg(test)]
    pub fn fail_on(&self, fault: Fault, key: &str) {
        self.faults
            .lock()
            .expect("fault set poisoned")
            .insert((fault, key.to_string()));
    }

    fn check_fault(&self, fault: Fault, key: &str) -> StorageResult<()> {
        #[cfg(test)]
        {
            let faults = self.faults.lock().expect("fault set poisoned");
            if faults.contains(&(fault, key.to_string())) {
                return Err(StorageError::Io(io::Error::other(format!(
                    "injected {fault:?} failure for `{key}`"
                ))));
            }
        }
        let _ = (fault, key);
        Ok(())
    }

    fn bucket<'a>(
        buckets: &'a BucketMap,
        bucket: &str,
    ) -> StorageResult<&'a BTreeMap<String, StoredObject>> {
        buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    fn bucket_mut<'a>(
        buckets: &'a mut BucketMap,
        bucket: &str,
    ) -> StorageResult<&'a mut BTreeMap<String, StoredObject>> {
        buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    fn object_mut<'a>(
        buckets: &'a mut BucketMap,
        bucket: &str,
        key: &str,
    ) -> StorageResult<&'a mut StoredObject> {
        Self::bucket_mut(buckets, bucket)?
            .get_mut(key)
            .ok_or_else(|| not_found(bucket, key))
    }
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStoreGateway for MemoryGateway {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> StorageResult<ObjectStat> {
        ensure_key_safe(key)?;
        let mut buckets = self.buckets.write().await;
        let objects = Self::bucket_mut(&mut buckets, bucket)?;

        if options.mode == PutMode::Create && objects.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let stat = ObjectStat {
            key: key.to_string(),
            size: body.len() as u64,
            last_modified: Utc::now(),
            content_type: options.content_type,
            etag: format!("{:x}", md5::compute(&body)),
            headers: options.headers,
        };
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                stat: stat.clone(),
                tags: TagSet::new(),
            },
        );
        Ok(stat)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let buckets = self.buckets.read().await;
        let object = Self::bucket(&buckets, bucket)?
            .get(key)
            .ok_or_else(|| not_found(bucket, key))?;
        let body = object.body.clone();
        Ok(ObjectBody {
            stat: object.stat.clone(),
            stream: stream::once(async move { Ok::<_, io::Error>(body) }).boxed(),
        })
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        let buckets = self.buckets.read().await;
        Self::bucket(&buckets, bucket)?
            .get(key)
            .map(|object| object.stat.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        recursive: bool,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let buckets = self.buckets.read().await;
        let entries = Self::bucket(&buckets, bucket)?
            .values()
            .filter(|object| prefix.is_none_or(|p| object.stat.key.starts_with(p)))
            .filter(|object| recursive || within_level(&object.stat.key, prefix))
            .map(|object| ObjectEntry {
                key: object.stat.key.clone(),
                size: object.stat.size,
                last_modified: object.stat.last_modified,
                etag: object.stat.etag.clone(),
            })
            .collect();
        Ok(entries)
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagSet> {
        self.check_fault(Fault::GetTags, key)?;
        let buckets = self.buckets.read().await;
        Self::bucket(&buckets, bucket)?
            .get(key)
            .map(|object| object.tags.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn set_tags(&self, bucket: &str, key: &str, tags: TagSet) -> StorageResult<()> {
        self.check_fault(Fault::SetTags, key)?;
        if tags.len() > MAX_TAGS_PER_OBJECT {
            return Err(StorageError::TooManyTags {
                key: key.to_string(),
                count: tags.len(),
                max: MAX_TAGS_PER_OBJECT,
            });
        }
        let mut buckets = self.buckets.write().await;
        Self::object_mut(&mut buckets, bucket, key)?.tags = tags;
        Ok(())
    }

    async fn remove_tags(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check_fault(Fault::SetTags, key)?;
        let mut buckets = self.buckets.write().await;
        Self::object_mut(&mut buckets, bucket, key)?.tags.clear();
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check_fault(Fault::Delete, key)?;
        let mut buckets = self.buckets.write().await;
        Self::bucket_mut(&mut buckets, bucket)?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
