//! src/services/local_store.rs
//!
//! LocalObjectStore: an [`ObjectStore`] backed by SQLite for object properties
//! and metadata, and local disk for payloads sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}`.

use crate::{
    models::object::{Metadata, ObjectInfo},
    services::object_store::{ObjectBody, ObjectPath, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{FromRow, SqlitePool};
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

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for object properties and metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

#[derive(FromRow)]
struct ObjectRow {
    key: String,
    content_type: Option<String>,
    size_bytes: i64,
    etag: Option<String>,
    last_modified: DateTime<Utc>,
    metadata: String,
}

impl ObjectRow {
    fn into_info(self) -> StoreResult<ObjectInfo> {
        Ok(ObjectInfo {
            metadata: serde_json::from_str(&self.metadata)?,
            key: self.key,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            etag: self.etag,
            last_modified: self.last_modified,
        })
    }
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Create the payload root and apply the embedded schema.
    ///
    /// Every statement is `IF NOT EXISTS`, so this is safe on every start.
    pub async fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;

        debug!("applying schema ({} bytes)", SCHEMA.len());
        sqlx::raw_sql(SCHEMA).execute(&*self.db).await?;
        Ok(())
    }

    /// Reject keys that could escape the container directory.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate container name format.
    ///
    /// Enforces S3-like bucket naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    pub fn ensure_container_name_safe(name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidContainerName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
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

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
        {
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

    fn ensure_path_safe(path: ObjectPath<'_>) -> StoreResult<()> {
        Self::ensure_container_name_safe(path.container)?;
        Self::ensure_key_safe(path.key)
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    /// Two-level shard identifiers from MD5(container/key).
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_file(&self, path: ObjectPath<'_>) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(path.container, path.key);
        let mut file = self.container_root(path.container);
        file.push(shard_a);
        file.push(shard_b);
        file.push(path.key);
        file
    }

    async fn fetch_row(&self, path: ObjectPath<'_>) -> StoreResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, etag, last_modified, metadata
             FROM objects WHERE container = ? AND key = ?",
        )
        .bind(path.container)
        .bind(path.key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::not_found(path),
            other => StoreError::Sqlx(other),
        })
    }

    async fn upsert_row(&self, path: ObjectPath<'_>, info: &ObjectInfo) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO objects (
                container, key, content_type, size_bytes, etag, last_modified, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                metadata = excluded.metadata
            "#,
        )
        .bind(path.container)
        .bind(path.key)
        .bind(info.content_type.as_deref())
        .bind(info.size_bytes)
        .bind(info.etag.as_deref())
        .bind(info.last_modified)
        .bind(serde_json::to_string(&info.metadata)?)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Prepare the parent directory of a payload file and return a fresh temp path beside it.
    async fn temp_beside(file_path: &Path) -> StoreResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    /// Move a finished temp file into place, replacing any previous payload.
    async fn commit_temp(tmp_path: &Path, file_path: &Path) -> StoreResult<()> {
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        Ok(())
    }

    /// Stream a body to a temp file, computing size and MD5 on the way.
    async fn write_temp(tmp_path: &Path, mut body: ObjectBody) -> StoreResult<(i64, String)> {
        let mut file = File::create(tmp_path).await?;
        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();

        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Recursively remove empty directories up to the container root.
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
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        path: ObjectPath<'_>,
        body: ObjectBody,
        content_type: Option<String>,
        metadata: Metadata,
    ) -> StoreResult<ObjectInfo> {
        Self::ensure_path_safe(path)?;

        let file_path = self.object_file(path);
        let tmp_path = Self::temp_beside(&file_path).await?;
        let (size_bytes, etag) = Self::write_temp(&tmp_path, body).await?;
        Self::commit_temp(&tmp_path, &file_path).await?;

        let info = ObjectInfo {
            key: path.key.to_string(),
            size_bytes,
            content_type,
            etag: Some(etag),
            last_modified: Utc::now(),
            metadata,
        };

        if let Err(err) = self.upsert_row(path, &info).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        debug!(container = path.container, key = path.key, size_bytes, "stored object");
        Ok(info)
    }

    async fn get(&self, path: ObjectPath<'_>) -> StoreResult<(ObjectInfo, ObjectBody)> {
        Self::ensure_path_safe(path)?;
        let info = self.fetch_row(path).await?.into_info()?;

        let file = File::open(self.object_file(path))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => StoreError::not_found(path),
                _ => StoreError::Io(err),
            })?;

        Ok((info, ReaderStream::new(file).boxed()))
    }

    async fn copy(&self, src: ObjectPath<'_>, dst: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
        Self::ensure_path_safe(src)?;
        Self::ensure_path_safe(dst)?;
        let source = self.fetch_row(src).await?.into_info()?;

        let dst_file = self.object_file(dst);
        let tmp_path = Self::temp_beside(&dst_file).await?;
        if let Err(err) = fs::copy(self.object_file(src), &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(match err.kind() {
                ErrorKind::NotFound => StoreError::not_found(src),
                _ => StoreError::Io(err),
            });
        }
        Self::commit_temp(&tmp_path, &dst_file).await?;

        let info = ObjectInfo {
            key: dst.key.to_string(),
            last_modified: Utc::now(),
            ..source
        };
        if let Err(err) = self.upsert_row(dst, &info).await {
            let _ = fs::remove_file(&dst_file).await;
            return Err(err);
        }
        debug!(
            from = %format!("{}/{}", src.container, src.key),
            to = %format!("{}/{}", dst.container, dst.key),
            "copied object"
        );
        Ok(info)
    }

    async fn delete(&self, path: ObjectPath<'_>) -> StoreResult<()> {
        Self::ensure_path_safe(path)?;

        let result = sqlx::query("DELETE FROM objects WHERE container = ? AND key = ?")
            .bind(path.container)
            .bind(path.key)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(path));
        }

        let file_path = self.object_file(path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let root = self.container_root(path.container);
            self.prune_empty_dirs(parent, &root).await;
        }
        Ok(())
    }

    async fn exists(&self, path: ObjectPath<'_>) -> StoreResult<bool> {
        Self::ensure_path_safe(path)?;
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM objects WHERE container = ? AND key = ?")
                .bind(path.container)
                .bind(path.key)
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    async fn head(&self, path: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
        Self::ensure_path_safe(path)?;
        self.fetch_row(path).await?.into_info()
    }

    async fn set_metadata(&self, path: ObjectPath<'_>, metadata: Metadata) -> StoreResult<()> {
        Self::ensure_path_safe(path)?;
        let result = sqlx::query("UPDATE objects SET metadata = ? WHERE container = ? AND key = ?")
            .bind(serde_json::to_string(&metadata)?)
            .bind(path.container)
            .bind(path.key)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(path));
        }
        Ok(())
    }

    async fn list_by_prefix(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        Self::ensure_container_name_safe(container)?;

        // Exact prefix comparison; LIKE would treat `_` and `%` in user ids as wildcards.
        let rows: Vec<ObjectRow> = sqlx::query_as(
            "SELECT key, content_type, size_bytes, etag, last_modified, metadata
             FROM objects
             WHERE container = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(container)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter().map(ObjectRow::into_info).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if one != 1 {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::Other,
                format!("unexpected probe result: {}", one),
            )));
        }

        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::{body_from_bytes, collect_body};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn store() -> (LocalObjectStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = LocalObjectStore::new(Arc::new(pool), dir.path().join("objects"));
        store.init().await.unwrap();
        (store, dir)
    }

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn container_names_follow_bucket_rules() {
        assert!(LocalObjectStore::ensure_container_name_safe("files").is_ok());
        assert!(LocalObjectStore::ensure_container_name_safe("trash-2").is_ok());
        assert!(LocalObjectStore::ensure_container_name_safe("ab").is_err());
        assert!(LocalObjectStore::ensure_container_name_safe("Files").is_err());
        assert!(LocalObjectStore::ensure_container_name_safe("-trash").is_err());
        assert!(LocalObjectStore::ensure_container_name_safe("a..b").is_err());
        assert!(LocalObjectStore::ensure_container_name_safe("10.0.0.1").is_err());
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(LocalObjectStore::ensure_key_safe("users/u1/a.txt").is_ok());
        assert!(LocalObjectStore::ensure_key_safe("users/u1/a..b.txt").is_ok());
        assert!(LocalObjectStore::ensure_key_safe("/etc/passwd").is_err());
        assert!(LocalObjectStore::ensure_key_safe("users/../x").is_err());
        assert!(LocalObjectStore::ensure_key_safe("users/u1/a\\b").is_err());
        assert!(LocalObjectStore::ensure_key_safe("").is_err());
    }

    #[tokio::test]
    async fn put_then_get_streams_payload_back() {
        let (store, _dir) = store().await;
        let path = ObjectPath::new("files", "users/u1/hello.txt");
        let info = store
            .put(
                path,
                body_from_bytes("hello"),
                Some("text/plain".into()),
                meta(&[("userId", "u1")]),
            )
            .await
            .unwrap();
        assert_eq!(info.size_bytes, 5);
        assert_eq!(info.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));

        let (head, body) = store.get(path).await.unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.metadata.get("userId").map(String::as_str), Some("u1"));
        assert_eq!(&collect_body(body).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let (store, _dir) = store().await;
        let path = ObjectPath::new("files", "users/u1/a.txt");
        store
            .put(path, body_from_bytes("first"), None, Metadata::new())
            .await
            .unwrap();
        store
            .put(path, body_from_bytes("second!"), None, Metadata::new())
            .await
            .unwrap();

        let listed = store.list_by_prefix("files", "users/u1/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, 7);
    }

    #[tokio::test]
    async fn copy_preserves_content_type_and_metadata() {
        let (store, _dir) = store().await;
        let src = ObjectPath::new("files", "users/u1/a.txt");
        let dst = ObjectPath::new("trash", "users/u1/1700000000000_a.txt");
        store
            .put(
                src,
                body_from_bytes("abc"),
                Some("text/plain".into()),
                meta(&[("originalName", "a.txt")]),
            )
            .await
            .unwrap();

        let copied = store.copy(src, dst).await.unwrap();
        assert_eq!(copied.key, dst.key);
        assert_eq!(copied.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            copied.metadata.get("originalName").map(String::as_str),
            Some("a.txt")
        );
        assert!(store.exists(src).await.unwrap());

        let (_, body) = store.get(dst).await.unwrap();
        assert_eq!(&collect_body(body).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn copy_from_missing_source_is_not_found() {
        let (store, _dir) = store().await;
        let err = store
            .copy(
                ObjectPath::new("trash", "users/u1/1_gone.txt"),
                ObjectPath::new("files", "users/u1/gone.txt"),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_not_idempotent() {
        let (store, dir) = store().await;
        let path = ObjectPath::new("files", "users/u1/a.txt");
        store
            .put(path, body_from_bytes("x"), None, Metadata::new())
            .await
            .unwrap();

        store.delete(path).await.unwrap();
        assert!(!store.exists(path).await.unwrap());
        assert!(store.delete(path).await.unwrap_err().is_not_found());

        // shard directories are pruned back to the container root
        let root = dir.path().join("objects").join("files");
        let mut entries = fs::read_dir(&root).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_metadata_replaces_map() {
        let (store, _dir) = store().await;
        let path = ObjectPath::new("trash", "users/u1/5_a.txt");
        store
            .put(path, body_from_bytes("x"), None, meta(&[("stale", "1")]))
            .await
            .unwrap();

        store
            .set_metadata(path, meta(&[("userId", "u1")]))
            .await
            .unwrap();
        let head = store.head(path).await.unwrap();
        assert_eq!(head.metadata, meta(&[("userId", "u1")]));

        let missing = ObjectPath::new("trash", "users/u1/6_b.txt");
        assert!(
            store
                .set_metadata(missing, Metadata::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn prefix_listing_treats_underscore_literally() {
        let (store, _dir) = store().await;
        for key in ["users/a_b/1.txt", "users/aXb/2.txt", "users/a_b/0.txt"] {
            store
                .put(
                    ObjectPath::new("files", key),
                    body_from_bytes("x"),
                    None,
                    Metadata::new(),
                )
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .list_by_prefix("files", "users/a_b/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["users/a_b/0.txt", "users/a_b/1.txt"]);
    }

    #[tokio::test]
    async fn containers_are_isolated() {
        let (store, _dir) = store().await;
        store
            .put(
                ObjectPath::new("files", "users/u1/a.txt"),
                body_from_bytes("x"),
                None,
                Metadata::new(),
            )
            .await
            .unwrap();
        assert!(store.list_by_prefix("trash", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_check_passes_on_fresh_store() {
        let (store, _dir) = store().await;
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn init_applies_bundled_schema_and_is_repeatable() {
        let (store, _dir) = store().await;
        store.init().await.unwrap();

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE name IN ('objects', 'idx_objects_last_modified') ORDER BY name",
        )
        .fetch_all(&*store.db)
        .await
        .unwrap();
        assert_eq!(names, ["idx_objects_last_modified", "objects"]);
    }
}
