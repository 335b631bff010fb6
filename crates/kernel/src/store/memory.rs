//! In-process datastore.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{NewUpload, Nonce, Upload};

use super::{Datastore, StoreError, StoreResult};

/// Datastore that keeps nonces and uploads in memory.
///
/// A single mutex guards both tables, so `record_upload` is atomic in the
/// same way the PostgreSQL transaction is.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    nonces: HashMap<String, Nonce>,
    uploads: Vec<Upload>,
    next_nonce_id: i64,
    next_upload_id: i64,
}

impl Tables {
    fn insert_nonce(&mut self, key: &str, user_id: Option<Uuid>) -> Nonce {
        self.next_nonce_id += 1;
        let nonce = Nonce {
            id: Some(self.next_nonce_id),
            key: key.to_string(),
            user_id,
            created: Some(Utc::now()),
        };
        self.nonces.insert(key.to_string(), nonce.clone());
        nonce
    }
}

impl MemoryDatastore {
    /// Create an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted nonces.
    pub fn nonce_count(&self) -> usize {
        self.inner.lock().nonces.len()
    }

    /// Number of recorded uploads.
    pub fn upload_count(&self) -> usize {
        self.inner.lock().uploads.len()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn find_nonce(&self, key: &str) -> StoreResult<Option<Nonce>> {
        Ok(self.inner.lock().nonces.get(key).cloned())
    }

    async fn nonce_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().nonces.contains_key(key))
    }

    async fn insert_nonce(&self, key: &str, user_id: Option<Uuid>) -> StoreResult<Nonce> {
        let mut tables = self.inner.lock();
        if tables.nonces.contains_key(key) {
            return Err(StoreError::Conflict);
        }
        Ok(tables.insert_nonce(key, user_id))
    }

    async fn record_upload(&self, nonce: &Nonce, upload: NewUpload) -> StoreResult<(Nonce, Upload)> {
        let mut tables = self.inner.lock();

        let existing = tables.nonces.get(&nonce.key).cloned();
        let nonce = match existing {
            Some(existing) if existing.user_id != nonce.user_id => {
                return Err(StoreError::OwnerMismatch);
            }
            Some(existing) => existing,
            None => tables.insert_nonce(&nonce.key, nonce.user_id),
        };

        let Some(nonce_id) = nonce.id else {
            return Err(StoreError::Conflict);
        };

        if tables
            .uploads
            .iter()
            .any(|u| u.nonce_id == nonce_id && u.filename == upload.filename)
        {
            return Err(StoreError::DuplicateUpload);
        }

        tables.next_upload_id += 1;
        let upload = Upload {
            id: tables.next_upload_id,
            nonce_id,
            uri: upload.uri,
            filename: upload.filename,
            mime_type: upload.mime_type,
            size: upload.size,
            upload_type: upload.upload_type,
            created: Utc::now(),
        };
        tables.uploads.push(upload.clone());

        Ok((nonce, upload))
    }

    async fn uploads_for_nonce(&self, nonce_id: i64) -> StoreResult<Vec<Upload>> {
        Ok(self
            .inner
            .lock()
            .uploads
            .iter()
            .filter(|u| u.nonce_id == nonce_id)
            .cloned()
            .collect())
    }

    async fn find_upload(&self, nonce_id: i64, upload_id: i64) -> StoreResult<Option<Upload>> {
        Ok(self
            .inner
            .lock()
            .uploads
            .iter()
            .find(|u| u.nonce_id == nonce_id && u.id == upload_id)
            .cloned())
    }

    async fn check_health(&self) -> bool {
        true
    }
}
