//! Defines routes for the file store and its trash.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Active files** (caller identity from `x-user-id` / `x-user-email`)
//!   - `POST   /api/files/upload`: multipart upload, field `file`
//!   - `GET    /api/files/list`: list own files
//!   - `GET    /api/files/download?name=`: stream a file
//!   - `DELETE /api/files/delete?name=`: move a file to the trash
//!
//! - **Trash**
//!   - `GET    /api/trash/list`: list own trash with days remaining
//!   - `POST   /api/trash/restore`: `{"path": ...}` back to the active namespace
//!   - `DELETE /api/trash/permanent-delete?path=`: irreversible delete
//!   - `POST   /api/trash/cleanup`: expiry sweep, requires `x-api-key`

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, list_files, upload_files},
        health_handlers::{healthz, readyz},
        trash_handlers::{cleanup, list_trash, permanent_delete, restore},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. `max_upload_bytes` caps request bodies on the upload route.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/api/files/upload",
            post(upload_files).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/files/list", get(list_files))
        .route("/api/files/download", get(download_file))
        .route("/api/files/delete", delete(delete_file))
        .route("/api/trash/list", get(list_trash))
        .route("/api/trash/restore", post(restore))
        .route("/api/trash/permanent-delete", delete(permanent_delete))
        .route("/api/trash/cleanup", post(cleanup))
}
