//! Typed views over object metadata plus the records returned to API callers.
//!
//! Object metadata is an untyped string map at the storage layer. Everything the
//! lifecycle code reads from it goes through [`TrashMetadata`] or [`FileMetadata`]
//! so missing or malformed fields surface as errors instead of empty strings.

use crate::models::object::Metadata;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const META_USER_ID: &str = "userId";
pub const META_ORIGINAL_NAME: &str = "originalName";
pub const META_DELETED_AT: &str = "deletedAt";
pub const META_UPLOADED_AT: &str = "uploadedAt";
pub const META_RESTORED_AT: &str = "restoredAt";
pub const META_ORIGINAL_CONTENT_TYPE: &str = "originalContentType";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata field `{0}` is missing")]
    Missing(&'static str),
    #[error("metadata field `{field}` has invalid value `{value}`")]
    Invalid { field: &'static str, value: String },
}

/// Metadata written on every trashed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashMetadata {
    pub user_id: String,
    pub original_name: String,
    pub deleted_at: DateTime<Utc>,
    pub original_content_type: Option<String>,
}

impl TrashMetadata {
    pub fn to_map(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert(META_USER_ID.into(), self.user_id.clone());
        map.insert(META_ORIGINAL_NAME.into(), self.original_name.clone());
        map.insert(META_DELETED_AT.into(), format_timestamp(self.deleted_at));
        if let Some(content_type) = &self.original_content_type {
            map.insert(META_ORIGINAL_CONTENT_TYPE.into(), content_type.clone());
        }
        map
    }

    /// Strict parse: `userId`, `originalName` and `deletedAt` are required.
    pub fn from_map(map: &Metadata) -> Result<Self, MetadataError> {
        StoredTrashMetadata::from_map(map)?.into_complete()
    }
}

/// Trash metadata as read back from a stored object.
///
/// Fields that are present must be well-formed; absent ones stay `None` so the
/// caller decides which it can do without.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTrashMetadata {
    pub user_id: Option<String>,
    pub original_name: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub original_content_type: Option<String>,
}

impl StoredTrashMetadata {
    pub fn from_map(map: &Metadata) -> Result<Self, MetadataError> {
        let deleted_at = optional(map, META_DELETED_AT)
            .map(|raw| parse_timestamp(META_DELETED_AT, &raw))
            .transpose()?;

        Ok(Self {
            user_id: optional(map, META_USER_ID),
            original_name: optional(map, META_ORIGINAL_NAME),
            deleted_at,
            original_content_type: optional(map, META_ORIGINAL_CONTENT_TYPE),
        })
    }

    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    /// Fails on the first missing required field, `originalName` first.
    pub fn into_complete(self) -> Result<TrashMetadata, MetadataError> {
        Ok(TrashMetadata {
            original_name: self
                .original_name
                .ok_or(MetadataError::Missing(META_ORIGINAL_NAME))?,
            user_id: self.user_id.ok_or(MetadataError::Missing(META_USER_ID))?,
            deleted_at: self
                .deleted_at
                .ok_or(MetadataError::Missing(META_DELETED_AT))?,
            original_content_type: self.original_content_type,
        })
    }
}

/// Metadata written on active objects, either at upload or at restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub user_id: String,
    pub original_name: String,
    pub event: FileEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Uploaded(DateTime<Utc>),
    Restored(DateTime<Utc>),
}

impl FileMetadata {
    pub fn uploaded(user_id: &str, original_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            original_name: original_name.to_string(),
            event: FileEvent::Uploaded(at),
        }
    }

    pub fn restored(user_id: &str, original_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            original_name: original_name.to_string(),
            event: FileEvent::Restored(at),
        }
    }

    pub fn to_map(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert(META_USER_ID.into(), self.user_id.clone());
        map.insert(META_ORIGINAL_NAME.into(), self.original_name.clone());
        match self.event {
            FileEvent::Uploaded(at) => map.insert(META_UPLOADED_AT.into(), format_timestamp(at)),
            FileEvent::Restored(at) => map.insert(META_RESTORED_AT.into(), format_timestamp(at)),
        };
        map
    }
}

/// Original name recorded on an object, if any.
pub fn original_name_of(map: &Metadata) -> Option<&str> {
    map.get(META_ORIGINAL_NAME)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn optional(map: &Metadata, field: &'static str) -> Option<String> {
    map.get(field).filter(|v| !v.is_empty()).cloned()
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, MetadataError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MetadataError::Invalid {
            field,
            value: value.to_string(),
        })
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An active file as shown to its owner.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub uploaded_at: Option<String>,
}

/// Result of a single upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A trashed file as shown to its owner, with retention figures already computed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub name: String,
    /// Trash key; the handle passed back to restore and permanent-delete.
    pub path: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub deleted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Success payload of a lifecycle mutation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationOutcome {
    pub fn new(name: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            name,
            message: Some(message.into()),
        }
    }
}

/// Result of one expiry sweep.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub success: bool,
    pub deleted_count: usize,
    /// Keys that could not be decoded and were left alone.
    pub skipped: usize,
    pub message: String,
}

impl SweepReport {
    pub fn new(deleted_count: usize, skipped: usize) -> Self {
        Self {
            success: true,
            deleted_count,
            skipped,
            message: format!("Cleaned up {} expired files from trash", deleted_count),
        }
    }
}
