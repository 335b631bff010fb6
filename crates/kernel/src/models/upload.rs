//! Upload model.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse upload type, selected by the upload route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    /// Image upload: MIME allow-list plus a decode check.
    Image,
    /// Any file, stored without content validation.
    #[default]
    Generic,
}

impl UploadType {
    /// Parse the optional upload type path segment.
    ///
    /// An empty segment selects a generic upload.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "image" => Some(Self::Image),
            "" | "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Value stored in the `upload_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Generic => "generic",
        }
    }
}

impl From<&str> for UploadType {
    fn from(v: &str) -> Self {
        Self::parse(v).unwrap_or_default()
    }
}

/// A stored upload, tagged with the nonce that authorized it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upload {
    pub id: i64,
    pub nonce_id: i64,
    /// Storage URI (e.g. `local://uploads/<nonce>_<name>`).
    pub uri: String,
    /// Client filename, sanitized as it is in the storage path.
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub upload_type: UploadType,
    pub created: DateTime<Utc>,
}

impl Upload {
    /// Extension of the stored file including the leading dot, or empty.
    pub fn extension(&self) -> String {
        Path::new(&self.uri)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default()
    }
}

/// Upload data ready to be recorded.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub uri: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub upload_type: UploadType,
}

/// Database row for an upload.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UploadRow {
    pub id: i64,
    pub nonce_id: i64,
    pub uri: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub upload_type: String,
    pub created: DateTime<Utc>,
}

impl From<UploadRow> for Upload {
    fn from(row: UploadRow) -> Self {
        Self {
            id: row.id,
            nonce_id: row.nonce_id,
            uri: row.uri,
            filename: row.filename,
            mime_type: row.mime_type,
            size: row.size,
            upload_type: UploadType::from(row.upload_type.as_str()),
            created: row.created,
        }
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_type_parse() {
        assert_eq!(UploadType::parse("image"), Some(UploadType::Image));
        assert_eq!(UploadType::parse(""), Some(UploadType::Generic));
        assert_eq!(UploadType::parse("generic"), Some(UploadType::Generic));
        assert_eq!(UploadType::parse("video"), None);
        assert_eq!(UploadType::from("unknown"), UploadType::Generic);
    }

    #[test]
    fn test_extension() {
        let upload = Upload {
            id: 1,
            nonce_id: 1,
            uri: "local://uploads/abc_photo.final.png".to_string(),
            filename: "photo.final.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 10,
            upload_type: UploadType::Image,
            created: Utc::now(),
        };
        assert_eq!(upload.extension(), ".png");

        let bare = Upload {
            uri: "local://uploads/abc_README".to_string(),
            ..upload
        };
        assert_eq!(bare.extension(), "");
    }
}
