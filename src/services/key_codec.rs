//! Storage key layout for the active and trash namespaces.
//!
//! ```text
//! active: users/<userId>/<fileName>
//! trash:  users/<userId>/<deletedAtMillis>_<fileName>
//! ```
//!
//! The trash key carries the deletion time, so the sweeper can decide expiry
//! from a listing alone. Decoding splits on the first `_` only; whatever
//! follows is the full original name even if it contains more underscores.

use thiserror::Error;

const USERS_ROOT: &str = "users/";
const TRASH_DELIMITER: char = '_';
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("user id `{0}` is not usable in a storage key")]
    InvalidUserId(String),
    #[error("file name `{0}` is not usable in a storage key")]
    InvalidFileName(String),
    #[error("`{0}` is not a trash key")]
    NotATrashKey(String),
}

/// The pieces recoverable from a trash key without reading metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrashKey {
    pub deleted_at_millis: i64,
    /// Name as embedded in the key. Only a fallback; metadata is authoritative.
    pub file_name_fragment: String,
}

pub fn validate_user_id(user_id: &str) -> Result<(), KeyError> {
    let ok = !user_id.is_empty()
        && user_id.len() <= MAX_NAME_LEN
        && user_id != "."
        && user_id != ".."
        && !user_id.contains('/')
        && !user_id.chars().any(|c| c.is_control() || c == '\\');
    if ok {
        Ok(())
    } else {
        Err(KeyError::InvalidUserId(user_id.to_string()))
    }
}

pub fn validate_file_name(file_name: &str) -> Result<(), KeyError> {
    let ok = !file_name.is_empty()
        && file_name.len() <= MAX_NAME_LEN
        && file_name != "."
        && file_name != ".."
        && !file_name.contains('/')
        && !file_name.chars().any(|c| c.is_control() || c == '\\');
    if ok {
        Ok(())
    } else {
        Err(KeyError::InvalidFileName(file_name.to_string()))
    }
}

/// `users/<userId>/`, the namespace every key of that user lives under.
pub fn user_prefix(user_id: &str) -> Result<String, KeyError> {
    validate_user_id(user_id)?;
    Ok(format!("{}{}/", USERS_ROOT, user_id))
}

pub fn active_key(user_id: &str, file_name: &str) -> Result<String, KeyError> {
    validate_file_name(file_name)?;
    Ok(format!("{}{}", user_prefix(user_id)?, file_name))
}

pub fn trash_key(user_id: &str, file_name: &str, deleted_at_millis: i64) -> Result<String, KeyError> {
    validate_file_name(file_name)?;
    Ok(format!(
        "{}{}{}{}",
        user_prefix(user_id)?,
        deleted_at_millis,
        TRASH_DELIMITER,
        file_name
    ))
}

pub fn decode_trash_key(key: &str) -> Result<DecodedTrashKey, KeyError> {
    let not_trash = || KeyError::NotATrashKey(key.to_string());

    let last_segment = key.rsplit('/').next().unwrap_or(key);
    let (timestamp, fragment) = last_segment
        .split_once(TRASH_DELIMITER)
        .ok_or_else(not_trash)?;

    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_trash());
    }
    let deleted_at_millis = timestamp.parse::<i64>().map_err(|_| not_trash())?;
    if fragment.is_empty() {
        return Err(not_trash());
    }

    Ok(DecodedTrashKey {
        deleted_at_millis,
        file_name_fragment: fragment.to_string(),
    })
}

/// True when `key` sits directly under the user's namespace.
pub fn belongs_to_user(key: &str, user_id: &str) -> bool {
    user_prefix(user_id)
        .map(|prefix| {
            key.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
        })
        .unwrap_or(false)
}
