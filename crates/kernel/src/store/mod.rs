//! Datastore abstraction for nonces and uploads.
//!
//! The nonce authority and the upload service only talk to a [`Datastore`].
//! [`PgDatastore`] is the production backend; [`MemoryDatastore`] keeps
//! everything in process and is used by tests and local tooling.

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewUpload, Nonce, Upload};

pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

/// Datastore errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A nonce with the same key already exists.
    #[error("nonce key already exists")]
    Conflict,

    /// The nonce was persisted by someone else with a different owner.
    #[error("nonce is owned by a different user")]
    OwnerMismatch,

    /// The nonce already has an upload with the same filename.
    #[error("filename already uploaded with this nonce")]
    DuplicateUpload,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent records for nonces and uploads.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Look up a persisted nonce by key.
    async fn find_nonce(&self, key: &str) -> StoreResult<Option<Nonce>>;

    /// Check whether a nonce key is already taken.
    async fn nonce_exists(&self, key: &str) -> StoreResult<bool>;

    /// Insert a new nonce.
    ///
    /// Fails with [`StoreError::Conflict`] when the key is taken.
    async fn insert_nonce(&self, key: &str, user_id: Option<Uuid>) -> StoreResult<Nonce>;

    /// Record an upload for `nonce`, persisting the nonce first if it is
    /// still pending. Both writes happen atomically.
    ///
    /// If a pending nonce's key was persisted concurrently, the existing row
    /// is reused as long as its owner matches; otherwise
    /// [`StoreError::OwnerMismatch`] is returned and nothing is written.
    /// Filenames are unique per nonce; a repeat fails with
    /// [`StoreError::DuplicateUpload`].
    async fn record_upload(&self, nonce: &Nonce, upload: NewUpload) -> StoreResult<(Nonce, Upload)>;

    /// All uploads authorized by a persisted nonce, oldest first.
    async fn uploads_for_nonce(&self, nonce_id: i64) -> StoreResult<Vec<Upload>>;

    /// A single upload, scoped to the nonce that authorized it.
    async fn find_upload(&self, nonce_id: i64, upload_id: i64) -> StoreResult<Option<Upload>>;

    /// Check that the datastore is reachable.
    async fn check_health(&self) -> bool;
}
