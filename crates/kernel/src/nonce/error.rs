//! Nonce resolution errors.

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while generating or resolving a nonce.
///
/// The display strings are shown to end users as validation messages.
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("No nonce was provided.")]
    MissingToken,

    #[error("The nonce signature was invalid.")]
    InvalidSignature,

    #[error("The nonce has expired.")]
    Expired,

    #[error("The current user does not have access to the specified nonce.")]
    UserMismatch,

    #[error("The nonce prefix is invalid.")]
    InvalidPrefix,

    #[error("The nonce could not be checked.")]
    Store(#[from] StoreError),
}

impl NonceError {
    /// Whether this failure is the client's fault (as opposed to the
    /// datastore being unavailable).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, NonceError::Store(_))
    }
}
