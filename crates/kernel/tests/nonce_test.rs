#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Nonce authority tests.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{TEST_SECRET, TestApp};
use tether_kernel::models::Nonce;
use tether_kernel::nonce::{NONCE_LENGTH, NonceAuthority, NonceError, NonceSettings};
use tether_kernel::store::{Datastore, MemoryDatastore};
use tether_test_utils::test_user;

/// Fixed signing time for boundary tests.
const T0: i64 = 1_700_000_000;

#[tokio::test]
async fn test_resolve_generated_token_returns_pending_nonce_for_owner() {
    let app = TestApp::new();
    let user = test_user();

    let token = app.token(Some(user));
    let nonce = app.authority().resolve(Some(&token)).await.unwrap();

    assert_eq!(nonce.user_id, Some(user));
    assert_eq!(nonce.key.len(), NONCE_LENGTH);
    assert!(!nonce.is_persisted());
    assert_eq!(app.store.nonce_count(), 0, "resolve must not persist");
}

#[tokio::test]
async fn test_resolve_anonymous_token() {
    let app = TestApp::new();

    let token = app.token(None);
    let nonce = app.authority().resolve(Some(&token)).await.unwrap();

    assert_eq!(nonce.user_id, None);
}

#[tokio::test]
async fn test_expiry_boundary() {
    let app = TestApp::new();
    let authority = app.authority();
    let token = authority.generate_at("", Some(test_user()), T0).unwrap();

    assert!(authority.resolve_at(Some(&token), T0 + 3599).await.is_ok());
    assert!(authority.resolve_at(Some(&token), T0 + 3600).await.is_ok());
    assert!(matches!(
        authority.resolve_at(Some(&token), T0 + 3601).await,
        Err(NonceError::Expired)
    ));
}

#[tokio::test]
async fn test_custom_max_age() {
    let app = TestApp::with_settings(NonceSettings::new(TEST_SECRET).max_age_secs(60));
    let authority = app.authority();
    let token = authority.generate_at("", None, T0).unwrap();

    assert!(authority.resolve_at(Some(&token), T0 + 59).await.is_ok());
    assert!(matches!(
        authority.resolve_at(Some(&token), T0 + 61).await,
        Err(NonceError::Expired)
    ));
}

#[tokio::test]
async fn test_missing_token() {
    let app = TestApp::new();

    assert!(matches!(
        app.authority().resolve(None).await,
        Err(NonceError::MissingToken)
    ));
    assert!(matches!(
        app.authority().resolve(Some("")).await,
        Err(NonceError::MissingToken)
    ));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let app = TestApp::new();
    let token = app.token(Some(test_user()));

    // Swap the bound user while keeping the signature.
    let (payload, rest) = token.split_once(':').unwrap();
    let (_, rest) = rest.split_once(':').unwrap();
    let forged = format!("{payload}:{}:{rest}", test_user());

    assert!(matches!(
        app.authority().resolve(Some(&forged)).await,
        Err(NonceError::InvalidSignature)
    ));
    assert!(matches!(
        app.authority().resolve(Some("garbage")).await,
        Err(NonceError::InvalidSignature)
    ));
}

#[tokio::test]
async fn test_token_from_other_secret_is_rejected() {
    let app = TestApp::new();
    let other = NonceAuthority::new(
        &NonceSettings::new("another-secret"),
        Arc::new(MemoryDatastore::new()),
    )
    .unwrap();

    let token = other.generate("", None).unwrap();

    assert!(matches!(
        app.authority().resolve(Some(&token)).await,
        Err(NonceError::InvalidSignature)
    ));
}

#[tokio::test]
async fn test_user_mismatch_on_persisted_nonce() {
    let app = TestApp::new();
    let owner = test_user();
    let intruder = test_user();

    let persisted = app.authority().generate_unique("", Some(owner)).await.unwrap();

    // A validly signed token for the same key, bound to someone else.
    let forged = app.authority().sign(&Nonce::pending(persisted.key.clone(), Some(intruder)));

    assert!(matches!(
        app.authority().resolve(Some(&forged)).await,
        Err(NonceError::UserMismatch)
    ));

    // The owner's token still resolves to the persisted record.
    let token = app.authority().sign(&persisted);
    let resolved = app.authority().resolve(Some(&token)).await.unwrap();
    assert_eq!(resolved, persisted);
}

#[tokio::test]
async fn test_resolve_returns_persisted_nonce_after_upload() {
    let app = TestApp::new();
    let user = test_user();
    let token = app.token(Some(user));

    let upload = app.upload_text(&token, "notes.txt").await;
    let nonce = app.authority().resolve(Some(&token)).await.unwrap();

    assert!(nonce.is_persisted());
    assert_eq!(nonce.id, Some(upload.nonce_id));
    assert_eq!(nonce.user_id, Some(user));
}

#[tokio::test]
async fn test_generate_unique_never_repeats_keys() {
    let app = TestApp::new();
    let user = test_user();

    let mut keys = HashSet::new();
    for _ in 0..50 {
        let nonce = app.authority().generate_unique("", Some(user)).await.unwrap();
        assert!(nonce.is_persisted());
        assert!(keys.insert(nonce.key));
    }

    assert_eq!(app.store.nonce_count(), 50);
}

#[tokio::test]
async fn test_generate_unique_with_prefix() {
    let app = TestApp::new();

    let nonce = app.authority().generate_unique("img", None).await.unwrap();
    assert!(nonce.key.starts_with("img"));
    assert_eq!(nonce.key.len(), NONCE_LENGTH);

    let found = app.store.find_nonce(&nonce.key).await.unwrap();
    assert_eq!(found, Some(nonce));
}

#[tokio::test]
async fn test_invalid_prefix() {
    let app = TestApp::new();
    let long = "x".repeat(NONCE_LENGTH);

    assert!(matches!(
        app.authority().generate(&long, None),
        Err(NonceError::InvalidPrefix)
    ));
    assert!(matches!(
        app.authority().generate_unique("bad prefix", None).await,
        Err(NonceError::InvalidPrefix)
    ));
}
