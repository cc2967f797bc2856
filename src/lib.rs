//! trash-vault: a multi-tenant file store with a time-bounded trash.
//!
//! Files live in an object-storage backend under per-user key prefixes.
//! Deleting a file moves it into a separate trash container under a key that
//! embeds the deletion time, from where it can be restored, purged by its
//! owner, or swept once the retention window has passed. No side database
//! tracks the trash: keys and object metadata carry all lifecycle state.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// The complete HTTP application with state attached.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes::routes::routes(max_upload_bytes).with_state(state)
}
