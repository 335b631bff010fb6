//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::file::DEFAULT_MAX_UPLOAD_SIZE;
use crate::nonce::{DEFAULT_MAX_AGE_SECS, NonceSettings};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Path to uploads directory (default: ./uploads).
    pub uploads_dir: PathBuf,

    /// Base URL for serving uploaded files (default: /files).
    pub files_url: String,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Secret used to sign upload nonces.
    pub secret_key: String,

    /// Maximum nonce age in seconds (default: 3600).
    pub nonce_max_age_secs: i64,

    /// Maximum upload size in bytes (default: 10 MiB).
    pub max_upload_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let uploads_dir = env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));

        let files_url = env::var("FILES_URL").unwrap_or_else(|_| "/files".to_string());

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let secret_key =
            env::var("SECRET_KEY").context("SECRET_KEY environment variable is required")?;
        if secret_key.is_empty() {
            anyhow::bail!("SECRET_KEY must not be empty");
        }

        let nonce_max_age_secs = env::var("NONCE_MAX_AGE_SECS")
            .map(|v| v.parse())
            .unwrap_or(Ok(DEFAULT_MAX_AGE_SECS))
            .context("NONCE_MAX_AGE_SECS must be a valid i64")?;

        let max_upload_size = env::var("MAX_UPLOAD_SIZE")
            .map(|v| v.parse())
            .unwrap_or(Ok(DEFAULT_MAX_UPLOAD_SIZE))
            .context("MAX_UPLOAD_SIZE must be a valid usize")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            uploads_dir,
            files_url,
            cors_allowed_origins,
            secret_key,
            nonce_max_age_secs,
            max_upload_size,
        })
    }

    /// Nonce settings derived from this configuration.
    pub fn nonce_settings(&self) -> NonceSettings {
        NonceSettings::new(self.secret_key.clone()).max_age_secs(self.nonce_max_age_secs)
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_settings() {
        let config = Config {
            port: 3000,
            database_url: "postgres://localhost/tether".to_string(),
            database_max_connections: 10,
            uploads_dir: PathBuf::from("./uploads"),
            files_url: "/files".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            secret_key: "s3cret".to_string(),
            nonce_max_age_secs: 600,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        };

        let settings = config.nonce_settings();
        assert_eq!(settings.secret_key, "s3cret");
        assert_eq!(settings.max_age_secs, 600);
    }
}
