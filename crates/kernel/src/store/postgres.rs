//! PostgreSQL datastore.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::nonce::NonceRow;
use crate::models::upload::UploadRow;
use crate::models::{NewUpload, Nonce, Upload};

use super::{Datastore, StoreError, StoreResult};

const NONCE_COLUMNS: &str = "id, key, user_id, created";
const UPLOAD_COLUMNS: &str =
    "id, nonce_id, uri, filename, mime_type, size, upload_type, created";

/// Datastore backed by the `upload_nonces` and `uploads` tables.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    /// Create a new PostgreSQL datastore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique-constraint violation to `conflict`.
fn map_unique_violation(err: sqlx::Error, conflict: StoreError) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => conflict,
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn find_nonce(&self, key: &str) -> StoreResult<Option<Nonce>> {
        let row = sqlx::query_as::<_, NonceRow>(&format!(
            "SELECT {NONCE_COLUMNS} FROM upload_nonces WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Nonce::from))
    }

    async fn nonce_exists(&self, key: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM upload_nonces WHERE key = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn insert_nonce(&self, key: &str, user_id: Option<Uuid>) -> StoreResult<Nonce> {
        let row = sqlx::query_as::<_, NonceRow>(&format!(
            "INSERT INTO upload_nonces (key, user_id) VALUES ($1, $2) RETURNING {NONCE_COLUMNS}"
        ))
        .bind(key)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, StoreError::Conflict))?;

        debug!(id = row.id, key = %row.key, "nonce created");
        Ok(Nonce::from(row))
    }

    async fn record_upload(&self, nonce: &Nonce, upload: NewUpload) -> StoreResult<(Nonce, Upload)> {
        let mut tx = self.pool.begin().await?;

        let nonce_row = match nonce.id {
            Some(id) => {
                sqlx::query_as::<_, NonceRow>(&format!(
                    "SELECT {NONCE_COLUMNS} FROM upload_nonces WHERE id = $1"
                ))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                let inserted = sqlx::query_as::<_, NonceRow>(&format!(
                    r#"
                    INSERT INTO upload_nonces (key, user_id) VALUES ($1, $2)
                    ON CONFLICT (key) DO NOTHING
                    RETURNING {NONCE_COLUMNS}
                    "#
                ))
                .bind(&nonce.key)
                .bind(nonce.user_id)
                .fetch_optional(&mut *tx)
                .await?;

                match inserted {
                    Some(row) => {
                        debug!(id = row.id, key = %row.key, "pending nonce persisted");
                        row
                    }
                    None => {
                        // Another upload with the same token got there first.
                        let existing = sqlx::query_as::<_, NonceRow>(&format!(
                            "SELECT {NONCE_COLUMNS} FROM upload_nonces WHERE key = $1"
                        ))
                        .bind(&nonce.key)
                        .fetch_one(&mut *tx)
                        .await?;

                        if existing.user_id != nonce.user_id {
                            return Err(StoreError::OwnerMismatch);
                        }
                        existing
                    }
                }
            }
        };

        let upload_row = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            INSERT INTO uploads (nonce_id, uri, filename, mime_type, size, upload_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {UPLOAD_COLUMNS}
            "#
        ))
        .bind(nonce_row.id)
        .bind(&upload.uri)
        .bind(&upload.filename)
        .bind(&upload.mime_type)
        .bind(upload.size)
        .bind(upload.upload_type.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, StoreError::DuplicateUpload))?;

        tx.commit().await?;

        Ok((Nonce::from(nonce_row), Upload::from(upload_row)))
    }

    async fn uploads_for_nonce(&self, nonce_id: i64) -> StoreResult<Vec<Upload>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE nonce_id = $1 ORDER BY id"
        ))
        .bind(nonce_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Upload::from).collect())
    }

    async fn find_upload(&self, nonce_id: i64, upload_id: i64) -> StoreResult<Option<Upload>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE nonce_id = $1 AND id = $2"
        ))
        .bind(nonce_id)
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Upload::from))
    }

    async fn check_health(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

impl std::fmt::Debug for PgDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatastore").finish()
    }
}
