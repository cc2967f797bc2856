//! Capability interface over the object-storage backend.
//!
//! The lifecycle code only ever talks to storage through [`ObjectStore`]. Objects
//! are addressed by `(container, key)`; every call is independently atomic at the
//! object level and nothing here retries.

use crate::models::object::{Metadata, ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::{io, pin::Pin};
use thiserror::Error;

/// Streaming object payload, used both for uploads and downloads.
pub type ObjectBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Wrap an in-memory buffer as an [`ObjectBody`].
pub fn body_from_bytes(bytes: impl Into<Bytes>) -> ObjectBody {
    let bytes = bytes.into();
    stream::once(async move { Ok(bytes) }).boxed()
}

/// Drain an [`ObjectBody`] into a single buffer.
pub async fn collect_body(mut body: ObjectBody) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// A fully-qualified object address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPath<'a> {
    pub container: &'a str,
    pub key: &'a str,
}

impl<'a> ObjectPath<'a> {
    pub fn new(container: &'a str, key: &'a str) -> Self {
        Self { container, key }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("stored metadata is unreadable: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn not_found(path: ObjectPath<'_>) -> Self {
        Self::ObjectNotFound {
            container: path.container.to_string(),
            key: path.key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object at the same key.
    async fn put(
        &self,
        path: ObjectPath<'_>,
        body: ObjectBody,
        content_type: Option<String>,
        metadata: Metadata,
    ) -> StoreResult<ObjectInfo>;

    /// Open an object for streaming reads.
    async fn get(&self, path: ObjectPath<'_>) -> StoreResult<(ObjectInfo, ObjectBody)>;

    /// Server-side copy. Content type and metadata travel with the payload and
    /// any object at `dst` is overwritten. A missing source is `ObjectNotFound`.
    async fn copy(&self, src: ObjectPath<'_>, dst: ObjectPath<'_>) -> StoreResult<ObjectInfo>;

    /// Remove an object. Not idempotent: an absent key is `ObjectNotFound`.
    async fn delete(&self, path: ObjectPath<'_>) -> StoreResult<()>;

    async fn exists(&self, path: ObjectPath<'_>) -> StoreResult<bool>;

    /// Properties and user metadata without the payload.
    async fn head(&self, path: ObjectPath<'_>) -> StoreResult<ObjectInfo>;

    /// Replace the user metadata of an existing object.
    async fn set_metadata(&self, path: ObjectPath<'_>, metadata: Metadata) -> StoreResult<()>;

    /// All objects in `container` whose key starts with `prefix`, ordered by key.
    async fn list_by_prefix(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>>;

    /// Cheap end-to-end probe used by readiness checks.
    async fn health_check(&self) -> StoreResult<()>;
}
