//! Upload nonce model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// An upload nonce.
///
/// A nonce starts life as a signed token only. Resolving that token yields
/// a *pending* record (no `id`, no `created`) until the first accepted
/// upload flushes it to the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nonce {
    /// Database ID, `None` while pending.
    pub id: Option<i64>,
    /// Random alphanumeric key, unique once persisted.
    pub key: String,
    /// Owning user, `None` for anonymous uploads.
    pub user_id: Option<Uuid>,
    /// Creation time, `None` while pending.
    pub created: Option<DateTime<Utc>>,
}

impl Nonce {
    /// Create a pending (unpersisted) nonce.
    pub fn pending(key: impl Into<String>, user_id: Option<Uuid>) -> Self {
        Self {
            id: None,
            key: key.into(),
            user_id,
            created: None,
        }
    }

    /// Whether this nonce has been written to the datastore.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user_id {
            Some(user_id) => write!(f, "Nonce for user {user_id}: {}", self.key),
            None => write!(f, "Nonce: {}", self.key),
        }
    }
}

/// Database row for a persisted nonce.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NonceRow {
    pub id: i64,
    pub key: String,
    pub user_id: Option<Uuid>,
    pub created: DateTime<Utc>,
}

impl From<NonceRow> for Nonce {
    fn from(row: NonceRow) -> Self {
        Self {
            id: Some(row.id),
            key: row.key,
            user_id: row.user_id,
            created: Some(row.created),
        }
    }
}
