//! Represents an object (blob) as seen through the storage adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-defined key/value metadata attached to an object.
///
/// Ordered so that serialized metadata is deterministic.
pub type Metadata = BTreeMap<String, String>;

/// A single stored object within a container.
///
/// Mirrors what an object-storage listing or HEAD request returns: the key,
/// system properties, and the user metadata map. It never carries payload bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Object key (path-like identifier within the container).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// MD5 checksum of the payload, hex encoded.
    pub etag: Option<String>,

    /// Timestamp when the object was last written or copied.
    pub last_modified: DateTime<Utc>,

    /// User metadata.
    pub metadata: Metadata,
}
