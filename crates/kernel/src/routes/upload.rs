//! Upload route handlers.
//!
//! Clients first fetch a signed nonce, then post files tagged with it.
//! Every response is JSON with a `status` of `ok` or `error`.

use axum::{
    Extension, Json, Router,
    extract::{Multipart, Path, State},
    routing::post,
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::UploadType;
use crate::state::AppState;

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "Filedata";

/// Multipart field carrying the signed nonce.
pub const NONCE_FIELD: &str = "nonce";

/// Identity of the requesting user, inserted as a request extension by the
/// host application's authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

/// Create the upload router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_generic))
        .route("/upload/nonce", post(issue_nonce))
        .route("/upload/{upload_type}", post(upload_typed))
}

/// Successful upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub url: String,
    #[serde(rename = "fileID")]
    pub file_id: i64,
}

/// Issued nonce response.
#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub status: &'static str,
    pub nonce: String,
}

/// Issue a signed nonce for the requesting user.
///
/// POST /upload/nonce
async fn issue_nonce(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> AppResult<Json<NonceResponse>> {
    let user_id = user.map(|Extension(CurrentUser(id))| id);
    let nonce = state.authority().generate("", user_id)?;

    debug!(user = ?user_id, "nonce issued");

    Ok(Json(NonceResponse {
        status: "ok",
        nonce,
    }))
}

/// Upload a file without content validation.
///
/// POST /upload
async fn upload_generic(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    handle_upload(&state, UploadType::Generic, multipart).await
}

/// Upload a file of the given type.
///
/// POST /upload/{upload_type}
async fn upload_typed(
    State(state): State<AppState>,
    Path(upload_type): Path<String>,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let Some(upload_type) = UploadType::parse(&upload_type) else {
        return Err(AppError::BadRequest(format!(
            "Unknown upload type: {upload_type}"
        )));
    };
    handle_upload(&state, upload_type, multipart).await
}

/// A received file.
struct ReceivedFile {
    filename: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

async fn handle_upload(
    state: &AppState,
    upload_type: UploadType,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut file: Option<ReceivedFile> = None;
    let mut nonce: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "failed to read multipart body");
        AppError::BadRequest("Failed to read upload data".to_string())
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FILE_FIELD) if file.is_none() => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    warn!(error = %e, "failed to read upload data");
                    AppError::BadRequest("Failed to read file data".to_string())
                })?;
                file = Some(ReceivedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            Some(NONCE_FIELD) => {
                let text = field.text().await.map_err(|e| {
                    warn!(error = %e, "failed to read nonce field");
                    AppError::BadRequest("Failed to read nonce".to_string())
                })?;
                nonce = Some(text);
            }
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(AppError::BadRequest("No file provided".to_string()));
    };

    let result = state
        .uploads()
        .upload(
            nonce.as_deref(),
            upload_type,
            &file.filename,
            file.content_type.as_deref(),
            &file.data,
        )
        .await?;

    Ok(Json(UploadResponse {
        status: "ok",
        url: result.url,
        file_id: result.id,
    }))
}
