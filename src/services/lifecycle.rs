//! src/services/lifecycle.rs
//!
//! LifecycleManager: moves files between the active and trash namespaces and
//! enforces ownership on every trash-scoped mutation.
//!
//! Every mutation is a short sequence of independently-atomic backend calls,
//! always copy-then-delete. A failure between the two steps leaves a duplicate
//! behind, never a loss. Nothing here retries or holds a lock; the backend is
//! the single source of truth.

use crate::{
    models::{
        object::ObjectInfo,
        trash::{
            FileEntry, FileMetadata, META_UPLOADED_AT, OperationOutcome, StoredTrashMetadata,
            TrashEntry, TrashMetadata, UploadedFile, original_name_of,
        },
    },
    services::{
        clock::{Clock, SystemClock},
        key_codec::{self, KeyError},
        object_store::{ObjectBody, ObjectPath, ObjectStore, StoreError},
        retention::RetentionPolicy,
    },
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const FILE_NOT_FOUND: &str = "File not found";
const TRASH_NOT_FOUND: &str = "File not found in trash";
const NOT_OWNER: &str = "Unauthorized: File does not belong to user";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    CorruptState(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(#[source] StoreError),
}

impl LifecycleError {
    /// Stable machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::CorruptState(_) => "corrupt_state",
            Self::InvalidInput(_) => "invalid_input",
            Self::BackendUnavailable(_) => "backend_unavailable",
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::InvalidObjectKey | StoreError::InvalidContainerName { .. } => {
                Self::InvalidInput(err.to_string())
            }
            other => Self::BackendUnavailable(other),
        }
    }
}

impl From<KeyError> for LifecycleError {
    fn from(err: KeyError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Typed read of a trash object's metadata. Malformed fields are corrupt state.
fn read_trash_metadata(trash_key: &str, info: &ObjectInfo) -> LifecycleResult<StoredTrashMetadata> {
    StoredTrashMetadata::from_map(&info.metadata).map_err(|err| {
        LifecycleError::CorruptState(format!("trash entry {}: {}", trash_key, err))
    })
}

/// Map a backend `ObjectNotFound` to a caller-facing message, pass everything else through.
fn missing_as(message: &str) -> impl FnOnce(StoreError) -> LifecycleError + '_ {
    move |err| {
        if err.is_not_found() {
            LifecycleError::NotFound(message.to_string())
        } else {
            err.into()
        }
    }
}

/// Construction-time settings for [`LifecycleManager`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub files_container: String,
    pub trash_container: String,
    pub retention: RetentionPolicy,
    /// Restore from the name embedded in the trash key when `originalName`
    /// metadata is missing. Off by default; such restores are logged as degraded.
    pub allow_key_fragment_restore: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            files_container: "files".into(),
            trash_container: "trash".into(),
            retention: RetentionPolicy::default(),
            allow_key_fragment_restore: false,
        }
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn ObjectStore>,
    config: Arc<LifecycleConfig>,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: LifecycleConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, mainly for driving retention in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.config.retention
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn files<'a>(&'a self, key: &'a str) -> ObjectPath<'a> {
        ObjectPath::new(&self.config.files_container, key)
    }

    fn trash<'a>(&'a self, key: &'a str) -> ObjectPath<'a> {
        ObjectPath::new(&self.config.trash_container, key)
    }

    /// Delete, treating an already-absent object as done. Returns whether this call removed it.
    async fn delete_if_present(&self, path: ObjectPath<'_>) -> LifecycleResult<bool> {
        match self.store.delete(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                debug!(
                    container = path.container,
                    key = path.key,
                    "delete target already gone"
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a trash object without any ownership check. Used by the sweeper.
    pub(crate) async fn purge_trash_object(&self, trash_key: &str) -> LifecycleResult<bool> {
        self.delete_if_present(self.trash(trash_key)).await
    }

    pub async fn upload_file(
        &self,
        user_id: &str,
        file_name: &str,
        body: ObjectBody,
        content_type: Option<String>,
    ) -> LifecycleResult<UploadedFile> {
        let key = key_codec::active_key(user_id, file_name)?;
        let now = self.now();
        let metadata = FileMetadata::uploaded(user_id, file_name, now).to_map();

        let stored = self
            .store
            .put(self.files(&key), body, content_type, metadata)
            .await?;

        info!(user_id, file_name, size = stored.size_bytes, "uploaded file");
        Ok(UploadedFile {
            name: file_name.to_string(),
            path: key,
            size: stored.size_bytes,
            content_type: stored.content_type,
            uploaded_at: now,
        })
    }

    pub async fn list_files(&self, user_id: &str) -> LifecycleResult<Vec<FileEntry>> {
        let prefix = key_codec::user_prefix(user_id)?;
        let objects = self
            .store
            .list_by_prefix(&self.config.files_container, &prefix)
            .await?;

        Ok(objects
            .into_iter()
            .filter(|obj| key_codec::belongs_to_user(&obj.key, user_id))
            .map(|obj| {
                let name = original_name_of(&obj.metadata)
                    .map(str::to_string)
                    .unwrap_or_else(|| obj.key[prefix.len()..].to_string());
                FileEntry {
                    name,
                    uploaded_at: obj.metadata.get(META_UPLOADED_AT).cloned(),
                    size: obj.size_bytes,
                    content_type: obj.content_type,
                    last_modified: obj.last_modified,
                    path: obj.key,
                }
            })
            .collect())
    }

    pub async fn download_file(
        &self,
        user_id: &str,
        file_name: &str,
    ) -> LifecycleResult<(ObjectInfo, ObjectBody)> {
        let key = key_codec::active_key(user_id, file_name)?;
        self.store
            .get(self.files(&key))
            .await
            .map_err(missing_as(FILE_NOT_FOUND))
    }

    pub async fn move_to_trash(
        &self,
        user_id: &str,
        file_name: &str,
    ) -> LifecycleResult<OperationOutcome> {
        let active = key_codec::active_key(user_id, file_name)?;
        let src = self.files(&active);
        let source = self
            .store
            .head(src)
            .await
            .map_err(missing_as(FILE_NOT_FOUND))?;

        // Same-millisecond moves of one name would share a key; step forward until free.
        let mut deleted_at = self.now();
        let mut trash_key = key_codec::trash_key(user_id, file_name, deleted_at.timestamp_millis())?;
        while self.store.exists(self.trash(&trash_key)).await? {
            deleted_at += TimeDelta::milliseconds(1);
            trash_key = key_codec::trash_key(user_id, file_name, deleted_at.timestamp_millis())?;
        }
        let dst = self.trash(&trash_key);

        self.store
            .copy(src, dst)
            .await
            .map_err(missing_as(FILE_NOT_FOUND))?;

        let metadata = TrashMetadata {
            user_id: user_id.to_string(),
            original_name: file_name.to_string(),
            deleted_at,
            original_content_type: source.content_type,
        };
        self.store.set_metadata(dst, metadata.to_map()).await?;

        // A concurrent move may have removed the original already; our copy still stands.
        if !self.delete_if_present(src).await? {
            warn!(user_id, file_name, "original vanished during move to trash");
        }

        info!(user_id, file_name, trash_key = %trash_key, "moved file to trash");
        Ok(OperationOutcome::new(
            Some(file_name.to_string()),
            self.config.retention.retention_message(),
        ))
    }

    /// The caller's trash, ordered by trash key.
    pub async fn list_trash(&self, user_id: &str) -> LifecycleResult<Vec<TrashEntry>> {
        let prefix = key_codec::user_prefix(user_id)?;
        let objects = self
            .store
            .list_by_prefix(&self.config.trash_container, &prefix)
            .await?;
        let now = self.now();
        let retention = self.config.retention;

        let mut entries = Vec::with_capacity(objects.len());
        for obj in objects {
            if !key_codec::belongs_to_user(&obj.key, user_id) {
                continue;
            }
            let decoded = match key_codec::decode_trash_key(&obj.key) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(key = %obj.key, %err, "skipping undecodable trash key");
                    continue;
                }
            };
            let stored = match read_trash_metadata(&obj.key, &obj) {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(key = %obj.key, %err, "skipping trash entry with unreadable metadata");
                    continue;
                }
            };
            if let Some(owner) = stored.owner() {
                if owner != user_id {
                    warn!(key = %obj.key, owner, user_id, "skipping trash entry owned by another user");
                    continue;
                }
            }
            let Some(deleted_at) = DateTime::from_timestamp_millis(decoded.deleted_at_millis)
            else {
                warn!(key = %obj.key, "skipping trash key with out-of-range timestamp");
                continue;
            };

            let expires_at = retention.expiry_of(deleted_at);
            let name = stored
                .original_name
                .unwrap_or(decoded.file_name_fragment);
            let content_type = stored.original_content_type.or(obj.content_type);

            entries.push(TrashEntry {
                name,
                path: obj.key,
                size: obj.size_bytes,
                content_type,
                deleted_at,
                expires_at,
                days_remaining: retention.days_remaining(expires_at, now),
            });
        }
        Ok(entries)
    }

    /// Copy a trash entry back to its original name, then drop the trash copy.
    ///
    /// If the entry disappears before the copy (a sweep or a permanent delete got
    /// there first) the restore fails with `NotFound` and nothing is written. If it
    /// disappears after the copy, the restore still succeeds and the file is active
    /// again, but the concurrent sweep will also have counted it as deleted. There
    /// are no conditional deletes, so both sides report success in that window.
    pub async fn restore_from_trash(
        &self,
        user_id: &str,
        trash_key: &str,
    ) -> LifecycleResult<OperationOutcome> {
        key_codec::validate_user_id(user_id)?;
        let src = self.trash(trash_key);
        let trashed = self
            .store
            .head(src)
            .await
            .map_err(missing_as(TRASH_NOT_FOUND))?;
        let stored = read_trash_metadata(trash_key, &trashed)?;

        let owned = match stored.owner() {
            Some(owner) => owner == user_id,
            None => key_codec::belongs_to_user(trash_key, user_id),
        };
        if !owned {
            warn!(user_id, trash_key, "restore refused: not the owner");
            return Err(LifecycleError::Unauthorized(NOT_OWNER.into()));
        }

        let original_name = match stored.original_name() {
            Some(name) => name.to_string(),
            None if self.config.allow_key_fragment_restore => {
                let decoded = key_codec::decode_trash_key(trash_key).map_err(|_| {
                    LifecycleError::CorruptState("Could not determine original file name".into())
                })?;
                warn!(
                    user_id,
                    trash_key,
                    name = %decoded.file_name_fragment,
                    "degraded restore: originalName metadata missing, using key fragment"
                );
                decoded.file_name_fragment
            }
            None => {
                return Err(LifecycleError::CorruptState(
                    "Could not determine original file name".into(),
                ));
            }
        };

        let active = key_codec::active_key(user_id, &original_name).map_err(|err| {
            LifecycleError::CorruptState(format!("stored original name is unusable: {}", err))
        })?;
        let dst = self.files(&active);

        // Last restore wins: whatever currently sits at the active key is overwritten.
        self.store
            .copy(src, dst)
            .await
            .map_err(missing_as(TRASH_NOT_FOUND))?;
        self.store
            .set_metadata(
                dst,
                FileMetadata::restored(user_id, &original_name, self.now()).to_map(),
            )
            .await?;
        self.delete_if_present(src).await?;

        info!(user_id, trash_key, name = %original_name, "restored file from trash");
        Ok(OperationOutcome::new(
            Some(original_name),
            "File restored successfully",
        ))
    }

    pub async fn permanent_delete(
        &self,
        user_id: &str,
        trash_key: &str,
    ) -> LifecycleResult<OperationOutcome> {
        key_codec::validate_user_id(user_id)?;
        let path = self.trash(trash_key);
        let trashed = self
            .store
            .head(path)
            .await
            .map_err(missing_as(TRASH_NOT_FOUND))?;

        // The key prefix is guessable; only the stored owner authorizes this.
        let stored = read_trash_metadata(trash_key, &trashed)?;
        if stored.owner() != Some(user_id) {
            warn!(user_id, trash_key, "permanent delete refused: not the owner");
            return Err(LifecycleError::Unauthorized(NOT_OWNER.into()));
        }

        self.delete_if_present(path).await?;
        info!(user_id, trash_key, "permanently deleted trash entry");
        Ok(OperationOutcome::new(None, "File permanently deleted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{object::Metadata, trash::META_ORIGINAL_NAME},
        services::{
            clock::ManualClock,
            memory_store::MemoryObjectStore,
            object_store::{StoreResult, body_from_bytes},
            sweeper::ExpirySweeper,
        },
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap()
    }

    fn manager() -> (LifecycleManager, MemoryObjectStore, ManualClock) {
        let store = MemoryObjectStore::new();
        let clock = ManualClock::new(t0());
        let manager = LifecycleManager::new(Arc::new(store.clone()), LifecycleConfig::default())
            .with_clock(Arc::new(clock.clone()));
        (manager, store, clock)
    }

    async fn upload(manager: &LifecycleManager, user: &str, name: &str, data: &'static str) {
        manager
            .upload_file(user, name, body_from_bytes(data), Some("text/plain".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn move_to_trash_leaves_no_active_copy() {
        let (manager, store, _) = manager();
        upload(&manager, "u1", "a.txt", "hello").await;

        let outcome = manager.move_to_trash("u1", "a.txt").await.unwrap();
        assert_eq!(outcome.name.as_deref(), Some("a.txt"));
        assert_eq!(
            outcome.message.as_deref(),
            Some("File moved to trash. Will be permanently deleted after 30 days.")
        );

        assert!(manager.list_files("u1").await.unwrap().is_empty());
        let trash_key = format!("users/u1/{}_a.txt", t0().timestamp_millis());
        let meta = store
            .head(ObjectPath::new("trash", &trash_key))
            .await
            .unwrap()
            .metadata;
        let parsed = TrashMetadata::from_map(&meta).unwrap();
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.deleted_at, t0());
        assert_eq!(parsed.original_content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn move_to_trash_of_missing_file_is_not_found() {
        let (manager, _, _) = manager();
        let err = manager.move_to_trash("u1", "nope.txt").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn repeated_delete_cycles_keep_every_generation() {
        let (manager, _, clock) = manager();
        upload(&manager, "u1", "a.txt", "v1").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();
        clock.advance(TimeDelta::seconds(5));
        upload(&manager, "u1", "a.txt", "v2").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();

        let trash = manager.list_trash("u1").await.unwrap();
        assert_eq!(trash.len(), 2);
        assert!(trash.iter().all(|e| e.name == "a.txt"));
        assert!(trash[0].path < trash[1].path);
    }

    #[tokio::test]
    async fn list_trash_counts_down_days() {
        let (manager, _, clock) = manager();
        upload(&manager, "u1", "a.txt", "hello").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();

        let entry = &manager.list_trash("u1").await.unwrap()[0];
        assert_eq!(entry.days_remaining, 30);
        assert_eq!(entry.expires_at, t0() + TimeDelta::days(30));
        assert_eq!(entry.content_type.as_deref(), Some("text/plain"));

        clock.advance(TimeDelta::days(29) + TimeDelta::hours(23));
        assert_eq!(manager.list_trash("u1").await.unwrap()[0].days_remaining, 1);

        clock.advance(TimeDelta::days(2));
        assert_eq!(manager.list_trash("u1").await.unwrap()[0].days_remaining, 0);
    }

    #[tokio::test]
    async fn list_trash_is_private_per_user() {
        let (manager, _, _) = manager();
        upload(&manager, "u1", "a.txt", "a").await;
        upload(&manager, "u10", "b.txt", "b").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();
        manager.move_to_trash("u10", "b.txt").await.unwrap();

        let names: Vec<String> = manager
            .list_trash("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn list_trash_skips_foreign_owner_metadata() {
        let (manager, store, _) = manager();
        let mut meta = Metadata::new();
        meta.insert("userId".into(), "intruder".into());
        meta.insert(META_ORIGINAL_NAME.into(), "x.txt".into());
        store
            .put(
                ObjectPath::new("trash", "users/u1/5_x.txt"),
                body_from_bytes("x"),
                None,
                meta,
            )
            .await
            .unwrap();

        assert!(manager.list_trash("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_round_trips_name_and_content_type() {
        let (manager, _, clock) = manager();
        upload(&manager, "u1", "my_notes_v2.txt", "hello").await;
        manager.move_to_trash("u1", "my_notes_v2.txt").await.unwrap();
        let key = manager.list_trash("u1").await.unwrap()[0].path.clone();

        clock.advance(TimeDelta::days(3));
        let outcome = manager.restore_from_trash("u1", &key).await.unwrap();
        assert_eq!(outcome.name.as_deref(), Some("my_notes_v2.txt"));

        let files = manager.list_files("u1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "my_notes_v2.txt");
        assert_eq!(files[0].content_type.as_deref(), Some("text/plain"));
        assert!(manager.list_trash("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_overwrites_newer_active_file() {
        let (manager, _, _) = manager();
        upload(&manager, "u1", "a.txt", "old").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();
        upload(&manager, "u1", "a.txt", "newer").await;
        let key = manager.list_trash("u1").await.unwrap()[0].path.clone();

        manager.restore_from_trash("u1", &key).await.unwrap();
        let files = manager.list_files("u1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 3);
    }

    #[tokio::test]
    async fn restore_without_original_name_is_corrupt() {
        let (manager, store, _) = manager();
        let mut meta = Metadata::new();
        meta.insert("userId".into(), "u1".into());
        let key = "users/u1/77_lost.txt";
        store
            .put(ObjectPath::new("trash", key), body_from_bytes("x"), None, meta)
            .await
            .unwrap();

        let err = manager.restore_from_trash("u1", key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::CorruptState(_)));
        assert!(store.exists(ObjectPath::new("trash", key)).await.unwrap());
    }

    #[tokio::test]
    async fn degraded_restore_uses_key_fragment_when_enabled() {
        let store = MemoryObjectStore::new();
        let manager = LifecycleManager::new(
            Arc::new(store.clone()),
            LifecycleConfig {
                allow_key_fragment_restore: true,
                ..LifecycleConfig::default()
            },
        );
        let mut meta = Metadata::new();
        meta.insert("userId".into(), "u1".into());
        let key = "users/u1/77_lost_and_found.txt";
        store
            .put(ObjectPath::new("trash", key), body_from_bytes("x"), None, meta)
            .await
            .unwrap();

        let outcome = manager.restore_from_trash("u1", key).await.unwrap();
        assert_eq!(outcome.name.as_deref(), Some("lost_and_found.txt"));
        assert!(
            store
                .exists(ObjectPath::new("files", "users/u1/lost_and_found.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn restore_of_someone_elses_trash_is_refused() {
        let (manager, _, _) = manager();
        upload(&manager, "alice", "secret.txt", "s").await;
        manager.move_to_trash("alice", "secret.txt").await.unwrap();
        let key = manager.list_trash("alice").await.unwrap()[0].path.clone();

        let err = manager.restore_from_trash("mallory", &key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
        assert!(manager.list_files("mallory").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_of_missing_key_is_not_found() {
        let (manager, _, _) = manager();
        let err = manager
            .restore_from_trash("u1", "users/u1/1_ghost.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(ref m) if m == TRASH_NOT_FOUND));
    }

    #[tokio::test]
    async fn permanent_delete_requires_stored_owner() {
        let (manager, store, _) = manager();
        upload(&manager, "alice", "a.txt", "a").await;
        manager.move_to_trash("alice", "a.txt").await.unwrap();
        let key = manager.list_trash("alice").await.unwrap()[0].path.clone();

        let err = manager.permanent_delete("bob", &key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
        assert!(store.exists(ObjectPath::new("trash", &key)).await.unwrap());

        let outcome = manager.permanent_delete("alice", &key).await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("File permanently deleted"));
        assert!(!store.exists(ObjectPath::new("trash", &key)).await.unwrap());

        let err = manager.permanent_delete("alice", &key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn permanent_delete_without_owner_metadata_is_refused() {
        let (manager, store, _) = manager();
        let key = "users/u1/3_a.txt";
        store
            .put(
                ObjectPath::new("trash", key),
                body_from_bytes("x"),
                None,
                Metadata::new(),
            )
            .await
            .unwrap();

        let err = manager.permanent_delete("u1", key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn same_millisecond_moves_keep_both_generations() {
        let (manager, store, _) = manager();
        upload(&manager, "u1", "a.txt", "one").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();
        upload(&manager, "u1", "a.txt", "three").await;
        manager.move_to_trash("u1", "a.txt").await.unwrap();

        let trash = manager.list_trash("u1").await.unwrap();
        assert_eq!(trash.len(), 2);
        let millis = t0().timestamp_millis();
        assert_eq!(trash[0].path, format!("users/u1/{}_a.txt", millis));
        assert_eq!(trash[1].path, format!("users/u1/{}_a.txt", millis + 1));
        let mut sizes: Vec<i64> = trash.iter().map(|e| e.size).collect();
        sizes.sort();
        assert_eq!(sizes, vec![3, 5]);

        let bumped = store
            .head(ObjectPath::new("trash", &trash[1].path))
            .await
            .unwrap();
        let parsed = TrashMetadata::from_map(&bumped.metadata).unwrap();
        assert_eq!(parsed.deleted_at, t0() + TimeDelta::milliseconds(1));
    }

    #[tokio::test]
    async fn malformed_trash_metadata_is_corrupt_state() {
        let (manager, store, _) = manager();
        let mut meta = Metadata::new();
        meta.insert("userId".into(), "u1".into());
        meta.insert(META_ORIGINAL_NAME.into(), "a.txt".into());
        meta.insert("deletedAt".into(), "last tuesday".into());
        let key = "users/u1/9_a.txt";
        store
            .put(ObjectPath::new("trash", key), body_from_bytes("x"), None, meta)
            .await
            .unwrap();

        assert!(matches!(
            manager.restore_from_trash("u1", key).await,
            Err(LifecycleError::CorruptState(_))
        ));
        assert!(matches!(
            manager.permanent_delete("u1", key).await,
            Err(LifecycleError::CorruptState(_))
        ));
        assert!(manager.list_trash("u1").await.unwrap().is_empty());
        assert!(store.exists(ObjectPath::new("trash", key)).await.unwrap());
    }

    /// Where [`SweepingStore`] removes trash objects on behalf of a concurrent sweep.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SweepPoint {
        AfterHead,
        AfterCopy,
        AfterList,
    }

    /// Memory store that deletes trash objects at a fixed point of an operation,
    /// counting the deletions that actually happened.
    struct SweepingStore {
        inner: MemoryObjectStore,
        at: SweepPoint,
        swept: AtomicUsize,
    }

    impl SweepingStore {
        fn new(inner: MemoryObjectStore, at: SweepPoint) -> Self {
            Self {
                inner,
                at,
                swept: AtomicUsize::new(0),
            }
        }

        async fn sweep(&self, path: ObjectPath<'_>) {
            if self.inner.delete(path).await.is_ok() {
                self.swept.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl ObjectStore for SweepingStore {
        async fn put(
            &self,
            path: ObjectPath<'_>,
            body: ObjectBody,
            content_type: Option<String>,
            metadata: Metadata,
        ) -> StoreResult<ObjectInfo> {
            self.inner.put(path, body, content_type, metadata).await
        }

        async fn get(&self, path: ObjectPath<'_>) -> StoreResult<(ObjectInfo, ObjectBody)> {
            self.inner.get(path).await
        }

        async fn copy(&self, src: ObjectPath<'_>, dst: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
            let info = self.inner.copy(src, dst).await?;
            if self.at == SweepPoint::AfterCopy && src.container == "trash" {
                self.sweep(src).await;
            }
            Ok(info)
        }

        async fn delete(&self, path: ObjectPath<'_>) -> StoreResult<()> {
            self.inner.delete(path).await
        }

        async fn exists(&self, path: ObjectPath<'_>) -> StoreResult<bool> {
            self.inner.exists(path).await
        }

        async fn head(&self, path: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
            let info = self.inner.head(path).await?;
            if self.at == SweepPoint::AfterHead && path.container == "trash" {
                self.sweep(path).await;
            }
            Ok(info)
        }

        async fn set_metadata(&self, path: ObjectPath<'_>, metadata: Metadata) -> StoreResult<()> {
            self.inner.set_metadata(path, metadata).await
        }

        async fn list_by_prefix(
            &self,
            container: &str,
            prefix: &str,
        ) -> StoreResult<Vec<ObjectInfo>> {
            let objects = self.inner.list_by_prefix(container, prefix).await?;
            if self.at == SweepPoint::AfterList && container == "trash" {
                for obj in &objects {
                    self.sweep(ObjectPath::new(container, &obj.key)).await;
                }
            }
            Ok(objects)
        }

        async fn health_check(&self) -> StoreResult<()> {
            self.inner.health_check().await
        }
    }

    /// A trashed `a.txt` for u1, with a manager whose store sweeps at `at`.
    async fn racing(at: SweepPoint) -> (LifecycleManager, Arc<SweepingStore>, String) {
        let (plain, inner, clock) = manager();
        upload(&plain, "u1", "a.txt", "hello").await;
        plain.move_to_trash("u1", "a.txt").await.unwrap();
        let key = plain.list_trash("u1").await.unwrap()[0].path.clone();

        let store = Arc::new(SweepingStore::new(inner, at));
        let manager = LifecycleManager::new(store.clone(), LifecycleConfig::default())
            .with_clock(Arc::new(clock));
        (manager, store, key)
    }

    #[tokio::test]
    async fn restore_losing_to_sweep_before_copy_is_not_found() {
        let (manager, store, key) = racing(SweepPoint::AfterHead).await;

        let err = manager.restore_from_trash("u1", &key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(ref m) if m == TRASH_NOT_FOUND));
        assert_eq!(store.swept.load(Ordering::SeqCst), 1);
        assert!(manager.list_files("u1").await.unwrap().is_empty());
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn restore_survives_sweep_after_copy() {
        let (manager, store, key) = racing(SweepPoint::AfterCopy).await;

        let outcome = manager.restore_from_trash("u1", &key).await.unwrap();
        assert_eq!(outcome.name.as_deref(), Some("a.txt"));
        assert_eq!(store.swept.load(Ordering::SeqCst), 1);

        let files = manager.list_files("u1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert!(!store.inner.exists(ObjectPath::new("trash", &key)).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_does_not_count_entries_already_gone() {
        let (manager, store, _) = racing(SweepPoint::AfterList).await;
        let expired = t0() + TimeDelta::days(31);
        let manager = manager.with_clock(Arc::new(ManualClock::new(expired)));

        let report = ExpirySweeper::new(manager)
            .cleanup_expired_trash()
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 0);
        assert_eq!(store.swept.load(Ordering::SeqCst), 1);
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_before_touching_storage() {
        let (manager, store, _) = manager();
        let err = manager
            .upload_file("u1", "../escape", body_from_bytes("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
        assert!(store.is_empty().await);
    }
}
