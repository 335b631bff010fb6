//! File storage backends.
//!
//! Provides trait and implementations for storing upload bytes locally or
//! in memory.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// File storage backend trait.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write data to a new file at the given relative path and return its
    /// URI. Fails if a file already exists there.
    async fn write(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Delete a file from storage.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Check if a file exists.
    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Get the public URL for a file.
    fn public_url(&self, uri: &str) -> String;

    /// Get the storage scheme (e.g., "local", "memory").
    fn scheme(&self) -> &'static str;
}

/// Reject relative paths that could escape the storage root.
fn check_relative_path(path: &str) -> Result<()> {
    for component in std::path::Path::new(path).components() {
        if !matches!(component, std::path::Component::Normal(_)) {
            anyhow::bail!("storage path must be relative without traversal: {path}");
        }
    }
    Ok(())
}

/// Local filesystem storage.
pub struct LocalFileStorage {
    /// Base path for file storage.
    base_path: PathBuf,
    /// Base URL for public file access.
    base_url: String,
}

impl LocalFileStorage {
    /// Create a new local file storage.
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Parse a local:// URI to get the absolute path.
    fn parse_uri(&self, uri: &str) -> Result<PathBuf> {
        let path = uri
            .strip_prefix("local://")
            .context("invalid local URI, must start with local://")?;
        check_relative_path(path)?;
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<String> {
        let uri = format!("local://{path}");
        let full_path = self.parse_uri(&uri)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create directories")?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .with_context(|| format!("failed to create file {uri}"))?;

        file.write_all(data).await.context("failed to write file")?;

        file.flush().await.context("failed to flush file")?;

        debug!(uri = %uri, path = ?full_path, size = data.len(), "file written");
        Ok(uri)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.parse_uri(uri)?;

        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .context("failed to delete file")?;
            debug!(uri = %uri, "file deleted");
        } else {
            warn!(uri = %uri, "file not found for deletion");
        }

        Ok(())
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = self.parse_uri(uri)?;
        fs::try_exists(&path)
            .await
            .context("failed to check file existence")
    }

    fn public_url(&self, uri: &str) -> String {
        let path = uri.strip_prefix("local://").unwrap_or(uri);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn scheme(&self) -> &'static str {
        "local"
    }
}

impl std::fmt::Debug for LocalFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileStorage")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// In-memory storage, for tests and throwaway environments.
#[derive(Debug, Default)]
pub struct MemoryFileStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryFileStorage {
    /// Create an empty in-memory storage serving URLs under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Stored bytes for `uri`.
    pub fn contents(&self, uri: &str) -> Option<Vec<u8>> {
        self.files.read().get(uri).cloned()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<String> {
        check_relative_path(path)?;
        let uri = format!("memory://{path}");
        match self.files.write().entry(uri.clone()) {
            Entry::Occupied(_) => anyhow::bail!("file already exists: {uri}"),
            Entry::Vacant(entry) => {
                entry.insert(data.to_vec());
            }
        }
        Ok(uri)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        if self.files.write().remove(uri).is_none() {
            warn!(uri = %uri, "file not found for deletion");
        }
        Ok(())
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        Ok(self.files.read().contains_key(uri))
    }

    fn public_url(&self, uri: &str) -> String {
        let path = uri.strip_prefix("memory://").unwrap_or(uri);
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn scheme(&self) -> &'static str {
        "memory"
    }
}
