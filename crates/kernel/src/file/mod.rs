//! File upload handling.
//!
//! Provides nonce-authorized upload validation and storage.

pub mod service;
pub mod storage;

pub use service::{
    DEFAULT_MAX_UPLOAD_SIZE, IMAGE_MIME_TYPES, UploadError, UploadResult, UploadService,
    guess_mime_type, upload_path,
};
pub use storage::{FileStorage, LocalFileStorage, MemoryFileStorage};
