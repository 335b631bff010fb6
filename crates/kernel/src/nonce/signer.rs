//! Timestamped HMAC signing for nonce tokens.
//!
//! Token format: `{value}:{timestamp}:{signature}` where the signature is the
//! URL-safe base64 HMAC-SHA256 of `{value}:{timestamp}`. Values may contain
//! `:` themselves, so parsing always splits from the right.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Separator between value, timestamp, and signature.
const SEPARATOR: char = ':';

/// Salt mixed into the signing key so nonce tokens can't be replayed
/// against other HMAC users of the same secret.
const KEY_SALT: &str = "tether.nonce.signer";

/// Why a token failed to unsign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// Malformed token or signature mismatch.
    BadSignature,
    /// Valid signature, but older than the allowed age.
    Expired { age: i64 },
}

/// Signs values with a timestamp and verifies them with an age limit.
#[derive(Clone)]
pub struct TimestampSigner {
    mac: HmacSha256,
}

impl TimestampSigner {
    /// Create a signer from a server-side secret.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            bail!("signing secret must not be empty");
        }

        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT.as_bytes());
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        let mac = HmacSha256::new_from_slice(&key).context("invalid signing key")?;
        Ok(Self { mac })
    }

    /// Sign `value` with the current time.
    pub fn sign(&self, value: &str) -> String {
        self.sign_at(value, chrono::Utc::now().timestamp())
    }

    /// Sign `value` with an explicit Unix timestamp.
    pub fn sign_at(&self, value: &str, timestamp: i64) -> String {
        let signed = format!("{value}{SEPARATOR}{timestamp}");
        let signature = self.signature(&signed);
        format!("{signed}{SEPARATOR}{signature}")
    }

    /// Verify a token against the current time and return its value.
    pub fn unsign(&self, token: &str, max_age: i64) -> Result<String, SignatureError> {
        self.unsign_at(token, max_age, chrono::Utc::now().timestamp())
    }

    /// Verify a token against an explicit "now" and return its value.
    ///
    /// A token exactly `max_age` seconds old is still accepted.
    pub fn unsign_at(&self, token: &str, max_age: i64, now: i64) -> Result<String, SignatureError> {
        let (signed, signature) = token
            .rsplit_once(SEPARATOR)
            .ok_or(SignatureError::BadSignature)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::BadSignature)?;

        let mut mac = self.mac.clone();
        mac.update(signed.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::BadSignature)?;

        let (value, timestamp) = signed
            .rsplit_once(SEPARATOR)
            .ok_or(SignatureError::BadSignature)?;
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| SignatureError::BadSignature)?;

        let age = now - timestamp;
        if age > max_age {
            return Err(SignatureError::Expired { age });
        }

        Ok(value.to_string())
    }

    fn signature(&self, signed: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(signed.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for TimestampSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampSigner").finish_non_exhaustive()
    }
}
