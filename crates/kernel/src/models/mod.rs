//! Database models.

pub mod nonce;
pub mod upload;

pub use nonce::Nonce;
pub use upload::{NewUpload, Upload, UploadType};
