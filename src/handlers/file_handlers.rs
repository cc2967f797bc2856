//! HTTP handlers for the active namespace: upload, list, download, delete.
//! Downloads stream straight from the backend; everything else delegates to
//! `LifecycleManager` with the caller's identity.

use crate::{
    errors::AppError,
    handlers::identity::AuthenticatedUser,
    models::{
        object::ObjectInfo,
        trash::{FileEntry, OperationOutcome, UploadedFile},
    },
    services::object_store::body_from_bytes,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};

const UPLOAD_FIELD: &str = "file";
const MAX_FILES_PER_UPLOAD: usize = 10;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

impl NameQuery {
    fn required(self) -> Result<String, AppError> {
        self.name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::bad_request("File name is required"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub success: bool,
    pub files: Vec<FileEntry>,
}

/// `POST /api/files/upload`: multipart form, one or more `file` fields.
pub async fn upload_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("Failed to parse form data: {}", err)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if files.len() == MAX_FILES_PER_UPLOAD {
            return Err(AppError::bad_request(format!(
                "At most {} files per upload",
                MAX_FILES_PER_UPLOAD
            )));
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("Uploaded file has no file name"))?;
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("Failed to read upload: {}", err)))?;

        let uploaded = state
            .lifecycle
            .upload_file(
                user.id(),
                &file_name,
                body_from_bytes(bytes),
                Some(content_type),
            )
            .await?;
        files.push(uploaded);
    }

    if files.is_empty() {
        return Err(AppError::bad_request("No file provided"));
    }

    Ok(Json(UploadResponse {
        success: true,
        files,
    }))
}

/// `GET /api/files/list`
pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ListFilesResponse>, AppError> {
    let files = state.lifecycle.list_files(user.id()).await?;
    Ok(Json(ListFilesResponse {
        success: true,
        files,
    }))
}

/// `GET /api/files/download?name=` as a streaming attachment.
pub async fn download_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NameQuery>,
) -> Result<Response, AppError> {
    let name = query.required()?;
    let (meta, body) = state.lifecycle.download_file(user.id(), &name).await?;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &meta, &name);
    Ok(response)
}

/// `DELETE /api/files/delete?name=`: soft delete into the trash.
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NameQuery>,
) -> Result<Json<OperationOutcome>, AppError> {
    let name = query.required()?;
    let outcome = state.lifecycle.move_to_trash(user.id(), &name).await?;
    Ok(Json(outcome))
}

fn set_download_headers(headers: &mut HeaderMap, meta: &ObjectInfo, file_name: &str) {
    let content_type = meta.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file_name.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
