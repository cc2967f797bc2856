//! HTTP handlers for the trash namespace and the expiry sweep trigger.

use crate::{
    errors::AppError,
    handlers::identity::AuthenticatedUser,
    models::trash::{OperationOutcome, SweepReport, TrashEntry},
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

pub const CLEANUP_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct TrashPathRequest {
    pub path: Option<String>,
}

impl TrashPathRequest {
    fn required(self) -> Result<String, AppError> {
        self.path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::bad_request("File path is required"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTrashResponse {
    pub success: bool,
    pub files: Vec<TrashEntry>,
}

/// `GET /api/trash/list`
pub async fn list_trash(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ListTrashResponse>, AppError> {
    let files = state.lifecycle.list_trash(user.id()).await?;
    Ok(Json(ListTrashResponse {
        success: true,
        files,
    }))
}

/// `POST /api/trash/restore` with JSON body `{"path": "<trash key>"}`.
pub async fn restore(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<TrashPathRequest>,
) -> Result<Json<OperationOutcome>, AppError> {
    let path = body.required()?;
    let outcome = state.lifecycle.restore_from_trash(user.id(), &path).await?;
    Ok(Json(outcome))
}

/// `DELETE /api/trash/permanent-delete?path=<trash key>`
pub async fn permanent_delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TrashPathRequest>,
) -> Result<Json<OperationOutcome>, AppError> {
    let path = query.required()?;
    let outcome = state.lifecycle.permanent_delete(user.id(), &path).await?;
    Ok(Json(outcome))
}

/// `POST /api/trash/cleanup`: system-wide sweep, for schedulers holding the cleanup key.
pub async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError> {
    let presented = headers
        .get(CLEANUP_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match (state.cleanup_api_key.as_deref(), presented) {
        (Some(expected), Some(given)) if expected == given => {}
        _ => return Err(AppError::unauthenticated("Unauthorized")),
    }

    let report = state.sweeper.cleanup_expired_trash().await?;
    Ok(Json(report))
}
