//! Upload nonces.
//!
//! A nonce is a signed, time-limited token that authorizes uploads. It is
//! handed out as a signed string and only written to the datastore once a
//! file has actually been uploaded with it.

mod authority;
mod error;
mod signer;

pub use authority::{DEFAULT_MAX_AGE_SECS, NONCE_LENGTH, NonceAuthority, NonceSettings};
pub use error::NonceError;
pub use signer::{SignatureError, TimestampSigner};
