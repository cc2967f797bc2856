//! In-memory [`ObjectStore`] backed by a `BTreeMap`.
//!
//! Suitable for tests and throwaway runs (`--backend memory`). Keys are kept in
//! `(container, key)` order so prefix listings come back sorted for free.

use crate::{
    models::object::{Metadata, ObjectInfo},
    services::object_store::{
        ObjectBody, ObjectPath, ObjectStore, StoreError, StoreResult, body_from_bytes,
        collect_body,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::RwLock;

#[derive(Clone)]
struct StoredBlob {
    info: ObjectInfo,
    data: Bytes,
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<(String, String), StoredBlob>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all containers.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

fn slot(path: ObjectPath<'_>) -> (String, String) {
    (path.container.to_string(), path.key.to_string())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: ObjectPath<'_>,
        body: ObjectBody,
        content_type: Option<String>,
        metadata: Metadata,
    ) -> StoreResult<ObjectInfo> {
        if path.key.is_empty() {
            return Err(StoreError::InvalidObjectKey);
        }
        let data = collect_body(body).await?;
        let info = ObjectInfo {
            key: path.key.to_string(),
            size_bytes: data.len() as i64,
            content_type,
            etag: Some(format!("{:x}", md5::compute(&data))),
            last_modified: Utc::now(),
            metadata,
        };
        self.objects.write().await.insert(
            slot(path),
            StoredBlob {
                info: info.clone(),
                data,
            },
        );
        Ok(info)
    }

    async fn get(&self, path: ObjectPath<'_>) -> StoreResult<(ObjectInfo, ObjectBody)> {
        let objects = self.objects.read().await;
        let blob = objects
            .get(&slot(path))
            .ok_or_else(|| StoreError::not_found(path))?;
        Ok((blob.info.clone(), body_from_bytes(blob.data.clone())))
    }

    async fn copy(&self, src: ObjectPath<'_>, dst: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
        let mut objects = self.objects.write().await;
        let source = objects
            .get(&slot(src))
            .cloned()
            .ok_or_else(|| StoreError::not_found(src))?;

        let info = ObjectInfo {
            key: dst.key.to_string(),
            last_modified: Utc::now(),
            ..source.info
        };
        objects.insert(
            slot(dst),
            StoredBlob {
                info: info.clone(),
                data: source.data,
            },
        );
        Ok(info)
    }

    async fn delete(&self, path: ObjectPath<'_>) -> StoreResult<()> {
        self.objects
            .write()
            .await
            .remove(&slot(path))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn exists(&self, path: ObjectPath<'_>) -> StoreResult<bool> {
        Ok(self.objects.read().await.contains_key(&slot(path)))
    }

    async fn head(&self, path: ObjectPath<'_>) -> StoreResult<ObjectInfo> {
        self.objects
            .read()
            .await
            .get(&slot(path))
            .map(|blob| blob.info.clone())
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn set_metadata(&self, path: ObjectPath<'_>, metadata: Metadata) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let blob = objects
            .get_mut(&slot(path))
            .ok_or_else(|| StoreError::not_found(path))?;
        blob.info.metadata = metadata;
        Ok(())
    }

    async fn list_by_prefix(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectInfo>> {
        let start = (container.to_string(), prefix.to_string());
        Ok(self
            .objects
            .read()
            .await
            .range(start..)
            .take_while(|((c, k), _)| c == container && k.starts_with(prefix))
            .map(|(_, blob)| blob.info.clone())
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
