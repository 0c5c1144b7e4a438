//! src/services/storage_service.rs
//!
//! StorageService: the durable [`ObjectStoreGateway`], backed by SQLite for
//! object metadata, headers and tags, and by local disk for payloads sharded
//! beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{
        bucket::BucketRecord,
        object::{HeaderMap, MAX_TAGS_PER_OBJECT, ObjectEntry, ObjectRecord, ObjectStat, TagSet},
    },
    services::gateway::{
        ObjectBody, ObjectStoreGateway, PutMode, PutOptions, StorageError, StorageResult,
        ensure_key_safe, within_level,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Durable object store: SQLite rows for metadata, files on disk for payloads.
///
/// Object writes are not visible until their row commits; a `PutMode::Create`
/// write holds the row's unique slot while the payload is renamed into place,
/// so two racing creates on one key cannot both land.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, content_type, size_bytes, etag, last_modified";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers for an object key: the first two bytes of
    /// MD5(bucket/key) as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<BucketRecord> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, BucketRecord>(
            "SELECT id, name FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &BucketRecord, key: &str) -> StorageResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ? AND bucket_id = ?"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_headers(&self, object_id: Uuid) -> StorageResult<HeaderMap> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM object_headers WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Resolve the bucket row and object row for a key.
    async fn locate(&self, bucket: &str, key: &str) -> StorageResult<(BucketRecord, ObjectRecord)> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;
        Ok((bucket_rec, object))
    }

    /// Write the payload to a temporary file next to its final location.
    ///
    /// The file is fsynced before returning; on error it is removed.
    async fn write_temp(&self, file_path: &Path, body: &Bytes) -> StorageResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        match written {
            Ok(()) => Ok(tmp_path),
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(StorageError::Io(err))
            }
        }
    }

    /// Insert the object row and headers, move the payload into place, commit.
    async fn commit_object(
        &self,
        bucket: &BucketRecord,
        record: &ObjectRecord,
        options: &PutOptions,
        tmp_path: &Path,
        file_path: &Path,
    ) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;

        if options.mode == PutMode::Overwrite {
            let existing = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM objects WHERE bucket_id = ? AND key = ?",
            )
            .bind(record.bucket_id)
            .bind(&record.key)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(object_id) = existing {
                delete_object_rows(&mut tx, object_id).await?;
            }
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.id)
        .bind(record.bucket_id)
        .bind(&record.key)
        .bind(record.content_type.clone())
        .bind(record.size_bytes)
        .bind(&record.etag)
        .bind(record.last_modified)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::AlreadyExists {
                    bucket: bucket.name.clone(),
                    key: record.key.clone(),
                });
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        for (name, value) in &options.headers {
            sqlx::query("INSERT INTO object_headers (object_id, name, value) VALUES (?, ?, ?)")
                .bind(record.id)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                return Err(StorageError::Io(err));
            }
        }

        if let Err(err) = tx.commit().await {
            let _ = fs::remove_file(file_path).await;
            return Err(StorageError::Sqlx(err));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for StorageService {
    /// Create the bucket row and directory; existing buckets are left alone.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;

        let result = sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        if result.rows_affected() > 0 {
            debug!("created bucket {}", bucket);
        }
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
        let bucket_rec = self.fetch_bucket(bucket).await?;

        // Cheap early refusal; the unique constraint is what actually decides.
        if options.mode == PutMode::Create {
            match self.fetch_object(&bucket_rec, key).await {
                Ok(_) => {
                    return Err(StorageError::AlreadyExists {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                Err(StorageError::ObjectNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = self.write_temp(&file_path, &body).await?;

        let record = ObjectRecord {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            key: key.to_string(),
            content_type: options.content_type.clone(),
            size_bytes: body.len() as i64,
            etag: format!("{:x}", md5::compute(&body)),
            last_modified: Utc::now(),
        };

        if let Err(err) = self
            .commit_object(&bucket_rec, &record, &options, &tmp_path, &file_path)
            .await
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        debug!("stored {}/{} ({} bytes)", bucket, key, record.size_bytes);
        Ok(record.into_stat(options.headers))
    }

    /// Returns ObjectNotFound if metadata exists but the payload file is missing.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let (bucket_rec, object) = self.locate(bucket, key).await?;
        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        let headers = self.fetch_headers(object.id).await?;

        Ok(ObjectBody {
            stat: object.into_stat(headers),
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        let (_, object) = self.locate(bucket, key).await?;
        let headers = self.fetch_headers(object.id).await?;
        Ok(object.into_stat(headers))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        recursive: bool,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket_id = "
        ));
        builder.push_bind(bucket_rec.id);
        if let Some(prefix) = prefix {
            builder.push(" AND key LIKE ");
            builder.push_bind(like_prefix_pattern(prefix));
            builder.push(" ESCAPE '\\'");
        }
        builder.push(" ORDER BY key ASC");

        let rows: Vec<ObjectRecord> = builder.build_query_as().fetch_all(&*self.db).await?;

        // LIKE is case-insensitive for ASCII; re-check the prefix exactly.
        Ok(rows
            .into_iter()
            .filter(|row| prefix.is_none_or(|p| row.key.starts_with(p)))
            .filter(|row| recursive || within_level(&row.key, prefix))
            .map(ObjectEntry::from)
            .collect())
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> StorageResult<TagSet> {
        let (_, object) = self.locate(bucket, key).await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT slot, value FROM object_tags WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn set_tags(&self, bucket: &str, key: &str, tags: TagSet) -> StorageResult<()> {
        if tags.len() > MAX_TAGS_PER_OBJECT {
            return Err(StorageError::TooManyTags {
                key: key.to_string(),
                count: tags.len(),
                max: MAX_TAGS_PER_OBJECT,
            });
        }
        let (_, object) = self.locate(bucket, key).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (slot, value) in &tags {
            sqlx::query("INSERT INTO object_tags (object_id, slot, value) VALUES (?, ?, ?)")
                .bind(object.id)
                .bind(slot)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_tags(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let (_, object) = self.locate(bucket, key).await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Remove the object's rows, then its payload, then any empty shard dirs.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let (bucket_rec, object) = self.locate(bucket, key).await?;

        let mut tx = self.db.begin().await?;
        delete_object_rows(&mut tx, object.id).await?;
        tx.commit().await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    /// SQLite answers `SELECT 1` and the payload root is reachable.
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        fs::metadata(&self.base_path).await?;
        Ok(())
    }
}

async fn delete_object_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    object_id: Uuid,
) -> StorageResult<()> {
    for table in ["object_headers", "object_tags"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE object_id = ?"))
            .bind(object_id)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("DELETE FROM objects WHERE id = ?")
        .bind(object_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// `LIKE` pattern matching keys that start with `prefix`, with `\` as escape.
fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
