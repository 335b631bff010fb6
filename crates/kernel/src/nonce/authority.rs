//! Nonce authority: provisions, signs, and resolves upload nonces.

use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Nonce;
use crate::store::{Datastore, StoreError};

use super::error::NonceError;
use super::signer::{SignatureError, TimestampSigner};

/// Total nonce key length, prefix included.
pub const NONCE_LENGTH: usize = 32;

/// Default maximum token age in seconds (1 hour).
pub const DEFAULT_MAX_AGE_SECS: i64 = 60 * 60;

/// Attempts `generate_unique` makes before giving up.
const MAX_UNIQUE_ATTEMPTS: usize = 16;

/// Immutable nonce configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct NonceSettings {
    /// Server-side signing secret.
    pub secret_key: String,
    /// Maximum token age in seconds.
    pub max_age_secs: i64,
}

impl NonceSettings {
    /// Settings with the default max age.
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    /// Override the maximum token age.
    pub fn max_age_secs(mut self, secs: i64) -> Self {
        self.max_age_secs = secs;
        self
    }
}

/// Issues and resolves upload nonces.
pub struct NonceAuthority {
    signer: TimestampSigner,
    store: Arc<dyn Datastore>,
    max_age_secs: i64,
}

impl NonceAuthority {
    /// Create a new authority.
    pub fn new(settings: &NonceSettings, store: Arc<dyn Datastore>) -> Result<Self> {
        Ok(Self {
            signer: TimestampSigner::new(&settings.secret_key)?,
            store,
            max_age_secs: settings.max_age_secs,
        })
    }

    /// Build a random key of [`NONCE_LENGTH`] characters starting with `prefix`.
    pub fn random_key(prefix: &str) -> Result<String, NonceError> {
        if prefix.len() >= NONCE_LENGTH || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NonceError::InvalidPrefix);
        }

        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LENGTH - prefix.len())
            .map(char::from)
            .collect();

        Ok(format!("{prefix}{random}"))
    }

    /// Generate a signed token for a fresh key. Does not touch the datastore.
    pub fn generate(&self, prefix: &str, user_id: Option<Uuid>) -> Result<String, NonceError> {
        self.generate_at(prefix, user_id, chrono::Utc::now().timestamp())
    }

    /// Generate a signed token with an explicit signing timestamp.
    pub fn generate_at(
        &self,
        prefix: &str,
        user_id: Option<Uuid>,
        timestamp: i64,
    ) -> Result<String, NonceError> {
        let key = Self::random_key(prefix)?;
        Ok(self.signer.sign_at(&encode_payload(&key, user_id), timestamp))
    }

    /// Resolve a signed token to a nonce record.
    ///
    /// Returns the persisted record when the key is already in the
    /// datastore, otherwise a pending record that the caller persists on
    /// first use.
    pub async fn resolve(&self, token: Option<&str>) -> Result<Nonce, NonceError> {
        self.resolve_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Resolve a signed token against an explicit "now".
    pub async fn resolve_at(&self, token: Option<&str>, now: i64) -> Result<Nonce, NonceError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(NonceError::MissingToken)?;

        let payload = self
            .signer
            .unsign_at(token, self.max_age_secs, now)
            .map_err(|e| match e {
                SignatureError::BadSignature => NonceError::InvalidSignature,
                SignatureError::Expired { age } => {
                    debug!(age, max_age = self.max_age_secs, "nonce expired");
                    NonceError::Expired
                }
            })?;

        let (key, user_id) = decode_payload(&payload)?;

        match self.store.find_nonce(&key).await? {
            Some(nonce) if nonce.user_id == user_id => Ok(nonce),
            Some(nonce) => {
                warn!(key = %nonce.key, "nonce resolved by a different user");
                Err(NonceError::UserMismatch)
            }
            None => Ok(Nonce::pending(key, user_id)),
        }
    }

    /// Generate and immediately persist a nonce with a key that is not yet
    /// taken.
    ///
    /// The existence check and the insert are not atomic; a unique
    /// violation on insert just means another request won the race, so a
    /// new key is tried.
    pub async fn generate_unique(
        &self,
        prefix: &str,
        user_id: Option<Uuid>,
    ) -> Result<Nonce, NonceError> {
        for _ in 0..MAX_UNIQUE_ATTEMPTS {
            let candidate = Self::random_key(prefix)?;
            if self.store.nonce_exists(&candidate).await? {
                continue;
            }

            match self.store.insert_nonce(&candidate, user_id).await {
                Ok(nonce) => return Ok(nonce),
                Err(StoreError::Conflict) => {
                    debug!(key = %candidate, "nonce key taken on insert, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict.into())
    }

    /// Sign the key of an existing nonce, e.g. one created with
    /// [`generate_unique`](Self::generate_unique), so it can be handed to a
    /// client.
    pub fn sign(&self, nonce: &Nonce) -> String {
        self.signer.sign(&encode_payload(&nonce.key, nonce.user_id))
    }

    /// Maximum token age in seconds.
    pub fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    /// Get the datastore.
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }
}

impl std::fmt::Debug for NonceAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceAuthority")
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

fn encode_payload(key: &str, user_id: Option<Uuid>) -> String {
    match user_id {
        Some(user_id) => format!("{key}:{user_id}"),
        None => format!("{key}:"),
    }
}

fn decode_payload(payload: &str) -> Result<(String, Option<Uuid>), NonceError> {
    let (key, user) = payload
        .rsplit_once(':')
        .ok_or(NonceError::InvalidSignature)?;

    if key.is_empty() {
        return Err(NonceError::InvalidSignature);
    }

    let user_id = if user.is_empty() {
        None
    } else {
        Some(Uuid::parse_str(user).map_err(|_| NonceError::InvalidSignature)?)
    };

    Ok((key.to_string(), user_id))
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_random_key_length_and_charset() {
        let key = NonceAuthority::random_key("").unwrap();
        assert_eq!(key.len(), NONCE_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));

        let prefixed = NonceAuthority::random_key("img").unwrap();
        assert_eq!(prefixed.len(), NONCE_LENGTH);
        assert!(prefixed.starts_with("img"));
    }

    #[test]
    fn test_random_key_rejects_bad_prefix() {
        let long = "a".repeat(NONCE_LENGTH);
        assert!(matches!(
            NonceAuthority::random_key(&long),
            Err(NonceError::InvalidPrefix)
        ));
        assert!(matches!(
            NonceAuthority::random_key("a:b"),
            Err(NonceError::InvalidPrefix)
        ));
    }

    #[test]
    fn test_payload_round_trip() {
        let user_id = Uuid::now_v7();
        let (key, user) = decode_payload(&encode_payload("abc", Some(user_id))).unwrap();
        assert_eq!(key, "abc");
        assert_eq!(user, Some(user_id));

        let (key, user) = decode_payload(&encode_payload("abc", None)).unwrap();
        assert_eq!(key, "abc");
        assert_eq!(user, None);
    }

    #[test]
    fn test_decode_payload_rejects_garbage() {
        assert!(decode_payload("no-separator").is_err());
        assert!(decode_payload(":").is_err());
        assert!(decode_payload("abc:not-a-uuid").is_err());
    }
}
