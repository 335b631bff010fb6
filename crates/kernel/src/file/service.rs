//! Upload service.
//!
//! Validates incoming files, writes them to storage under a nonce-scoped
//! path, and records them against the nonce that authorized them.

use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{NewUpload, Upload, UploadType};
use crate::nonce::{NonceAuthority, NonceError};
use crate::store::StoreError;

use super::storage::FileStorage;

/// Default maximum upload size (10 MB).
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// MIME types accepted for image uploads.
pub const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/gif", "image/png", "image/jpg"];

/// Directory (relative to the storage root) that uploads are written to.
const UPLOAD_DIR: &str = "uploads";

/// Upload failures.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Nonce(#[from] NonceError),

    /// Content rejected (type, size, or format).
    #[error("{0}")]
    Validation(String),

    #[error("failed to store file")]
    Storage(#[source] anyhow::Error),

    #[error("failed to record upload")]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Whether the client can fix this by sending something else.
    pub fn is_client_error(&self) -> bool {
        match self {
            UploadError::Nonce(e) => e.is_client_error(),
            UploadError::Validation(_) => true,
            UploadError::Storage(_) | UploadError::Store(_) => false,
        }
    }

    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub id: i64,
    pub url: String,
    pub upload: Upload,
}

/// Service for accepting nonce-authorized uploads.
pub struct UploadService {
    authority: Arc<NonceAuthority>,
    storage: Arc<dyn FileStorage>,
    max_upload_size: usize,
}

impl UploadService {
    /// Create a new upload service.
    pub fn new(
        authority: Arc<NonceAuthority>,
        storage: Arc<dyn FileStorage>,
        max_upload_size: usize,
    ) -> Self {
        Self {
            authority,
            storage,
            max_upload_size,
        }
    }

    /// Accept an upload authorized by a signed nonce token.
    ///
    /// A pending nonce is persisted together with its first upload. If the
    /// upload can't be recorded, the written file is removed again.
    pub async fn upload(
        &self,
        token: Option<&str>,
        upload_type: UploadType,
        filename: &str,
        declared_mime: Option<&str>,
        data: &[u8],
    ) -> Result<UploadResult, UploadError> {
        let nonce = self.authority.resolve(token).await?;

        let mime_type = self.validate(upload_type, filename, declared_mime, data)?;

        // Paths are derived from the sanitized name, so that is what must be
        // unique per nonce.
        let filename = sanitize_filename(filename);
        if let Some(nonce_id) = nonce.id {
            let uploads = self.authority.store().uploads_for_nonce(nonce_id).await?;
            if uploads.iter().any(|u| u.filename == filename) {
                return Err(duplicate_filename());
            }
        }

        let path = upload_path(&nonce.key, &filename);
        let uri = self
            .storage
            .write(&path, data)
            .await
            .map_err(UploadError::Storage)?;

        let new_upload = NewUpload {
            uri: uri.clone(),
            filename,
            mime_type,
            size: data.len() as i64,
            upload_type,
        };

        let (nonce, upload) = match self.authority.store().record_upload(&nonce, new_upload).await {
            Ok(recorded) => recorded,
            // The uri belongs to the upload already recorded under this name.
            Err(StoreError::DuplicateUpload) => return Err(duplicate_filename()),
            Err(e) => {
                if let Err(del) = self.storage.delete(&uri).await {
                    warn!(error = %del, uri = %uri, "failed to remove unrecorded upload");
                }
                return Err(match e {
                    StoreError::OwnerMismatch => NonceError::UserMismatch.into(),
                    e => e.into(),
                });
            }
        };

        info!(
            id = upload.id,
            nonce = %nonce.key,
            upload_type = upload.upload_type.as_str(),
            size = upload.size,
            "file uploaded"
        );

        Ok(UploadResult {
            id: upload.id,
            url: self.storage.public_url(&upload.uri),
            upload,
        })
    }

    /// Validate an upload and return the MIME type to record.
    fn validate(
        &self,
        upload_type: UploadType,
        filename: &str,
        declared_mime: Option<&str>,
        data: &[u8],
    ) -> Result<String, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Validation("Empty file".to_string()));
        }

        if data.len() > self.max_upload_size {
            return Err(UploadError::Validation(format!(
                "File too large: {} bytes (max {} bytes)",
                data.len(),
                self.max_upload_size
            )));
        }

        match upload_type {
            UploadType::Image => {
                let mime = guess_mime_type(filename)
                    .filter(|mime| IMAGE_MIME_TYPES.contains(&mime.as_str()))
                    .ok_or_else(|| {
                        UploadError::Validation(
                            "Image must be a JPEG, GIF or PNG with the proper extension."
                                .to_string(),
                        )
                    })?;

                if let Err(e) = image::load_from_memory(data) {
                    debug!(error = %e, filename = %filename, "image failed to decode");
                    return Err(UploadError::Validation(
                        "The file could not be read as an image.".to_string(),
                    ));
                }

                Ok(mime)
            }
            UploadType::Generic => Ok(infer::get(data)
                .map(|kind| kind.mime_type().to_string())
                .or_else(|| guess_mime_type(filename))
                .or_else(|| declared_mime.map(str::to_string))
                .unwrap_or_else(|| "application/octet-stream".to_string())),
        }
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<dyn FileStorage> {
        &self.storage
    }

    /// Get the nonce authority.
    pub fn authority(&self) -> &Arc<NonceAuthority> {
        &self.authority
    }
}

impl std::fmt::Debug for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadService")
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

fn duplicate_filename() -> UploadError {
    UploadError::Validation(
        "A file with this name was already uploaded with this nonce.".to_string(),
    )
}

/// Storage path for an upload: scoped by nonce key, so two nonces never
/// collide on the same filename.
pub fn upload_path(nonce_key: &str, filename: &str) -> String {
    format!("{UPLOAD_DIR}/{nonce_key}_{}", sanitize_filename(filename))
}

/// Sanitize a filename for safe storage. The result is at most 200
/// ASCII characters.
pub(crate) fn sanitize_filename(filename: &str) -> String {
    use std::path::Path;

    // Get just the filename part (no path)
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(200)
        .collect()
}

/// Guess MIME type from filename extension.
pub fn guess_mime_type(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let mime = match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        _ => return None,
    };
    Some(mime.to_string())
}
