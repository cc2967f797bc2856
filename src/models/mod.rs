//! Core data models for the trash-aware file store.
//!
//! `object` is the storage-level view of a blob; `trash` holds the typed
//! metadata records and the JSON shapes handed back to API callers.

pub mod object;
pub mod trash;
