//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::file::{FileStorage, LocalFileStorage, UploadService};
use crate::nonce::{NonceAuthority, NonceSettings};
use crate::store::{Datastore, PgDatastore};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Nonce and upload records.
    store: Arc<dyn Datastore>,

    /// Issues and resolves upload nonces.
    authority: Arc<NonceAuthority>,

    /// Accepts nonce-authorized uploads.
    uploads: Arc<UploadService>,

    /// Where upload bytes are written.
    storage: Arc<dyn FileStorage>,

    /// Maximum accepted request body for uploads.
    max_upload_size: usize,
}

impl AppState {
    /// Create application state backed by PostgreSQL and local storage.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config)
            .await
            .context("failed to create database pool")?;

        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;

        let storage = Arc::new(LocalFileStorage::new(
            config.uploads_dir.clone(),
            config.files_url.clone(),
        ));

        info!(uploads_dir = ?config.uploads_dir, "local file storage configured");

        Self::from_parts(
            &config.nonce_settings(),
            Arc::new(PgDatastore::new(pool)),
            storage,
            config.max_upload_size,
        )
    }

    /// Assemble state from explicit backends.
    pub fn from_parts(
        settings: &NonceSettings,
        store: Arc<dyn Datastore>,
        storage: Arc<dyn FileStorage>,
        max_upload_size: usize,
    ) -> Result<Self> {
        let authority = Arc::new(
            NonceAuthority::new(settings, Arc::clone(&store))
                .context("failed to create nonce authority")?,
        );

        let uploads = Arc::new(UploadService::new(
            Arc::clone(&authority),
            Arc::clone(&storage),
            max_upload_size,
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                store,
                authority,
                uploads,
                storage,
                max_upload_size,
            }),
        })
    }

    /// Get the datastore.
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.inner.store
    }

    /// Get the nonce authority.
    pub fn authority(&self) -> &Arc<NonceAuthority> {
        &self.inner.authority
    }

    /// Get the upload service.
    pub fn uploads(&self) -> &Arc<UploadService> {
        &self.inner.uploads
    }

    /// Get the file storage backend.
    pub fn storage(&self) -> &Arc<dyn FileStorage> {
        &self.inner.storage
    }

    /// Maximum accepted upload size in bytes.
    pub fn max_upload_size(&self) -> usize {
        self.inner.max_upload_size
    }

    /// Check if the datastore is reachable.
    pub async fn store_healthy(&self) -> bool {
        self.inner.store.check_health().await
    }
}
