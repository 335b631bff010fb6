#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Upload service tests.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{TEST_MAX_UPLOAD_SIZE, TEST_SECRET, TestApp};
use tether_kernel::AppState;
use tether_kernel::file::{FileStorage, MemoryFileStorage, UploadError};
use tether_kernel::models::{NewUpload, Nonce, Upload, UploadType};
use tether_kernel::nonce::{NonceError, NonceSettings};
use tether_kernel::store::{Datastore, MemoryDatastore, StoreResult};
use tether_test_utils::{gif_bytes, png_bytes, test_user};
use uuid::Uuid;

#[tokio::test]
async fn test_image_upload_persists_nonce_and_file() {
    let app = TestApp::new();
    let user = test_user();
    let token = app.token(Some(user));

    let result = app
        .state
        .uploads()
        .upload(
            Some(&token),
            UploadType::Image,
            "photo.png",
            Some("image/png"),
            &png_bytes(),
        )
        .await
        .unwrap();

    let nonce = app.authority().resolve(Some(&token)).await.unwrap();
    assert_eq!(nonce.id, Some(result.upload.nonce_id));
    assert_eq!(nonce.user_id, Some(user));

    assert_eq!(result.upload.mime_type, "image/png");
    assert_eq!(result.upload.upload_type, UploadType::Image);
    assert_eq!(result.url, format!("/files/uploads/{}_photo.png", nonce.key));
    assert!(app.storage.exists(&result.upload.uri).await.unwrap());

    assert_eq!(app.store.nonce_count(), 1);
    assert_eq!(app.store.upload_count(), 1);
}

#[tokio::test]
async fn test_gif_upload_is_accepted() {
    let app = TestApp::new();
    let token = app.token(None);

    let result = app
        .state
        .uploads()
        .upload(Some(&token), UploadType::Image, "anim.gif", None, &gif_bytes())
        .await
        .unwrap();

    assert_eq!(result.upload.mime_type, "image/gif");
}

#[tokio::test]
async fn test_text_file_rejected_as_image_and_not_persisted() {
    let app = TestApp::new();
    let token = app.token(Some(test_user()));

    let err = app
        .state
        .uploads()
        .upload(
            Some(&token),
            UploadType::Image,
            "notes.txt",
            Some("text/plain"),
            b"just some text",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert!(err.is_client_error());
    assert_eq!(app.store.nonce_count(), 0);
    assert_eq!(app.store.upload_count(), 0);
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn test_undecodable_image_rejected() {
    let app = TestApp::new();
    let token = app.token(None);

    let err = app
        .state
        .uploads()
        .upload(
            Some(&token),
            UploadType::Image,
            "fake.png",
            Some("image/png"),
            b"not really a png",
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "The file could not be read as an image.");
    assert!(app.storage.is_empty());
    assert_eq!(app.store.upload_count(), 0);
}

#[tokio::test]
async fn test_generic_upload_sniffs_mime_type() {
    let app = TestApp::new();
    let token = app.token(None);

    let result = app
        .state
        .uploads()
        .upload(Some(&token), UploadType::Generic, "blob.bin", None, &png_bytes())
        .await
        .unwrap();
    assert_eq!(result.upload.mime_type, "image/png");

    let upload = app.upload_text(&token, "notes.txt").await;
    assert_eq!(upload.mime_type, "text/plain");
    assert_eq!(upload.upload_type, UploadType::Generic);
}

#[tokio::test]
async fn test_pending_nonce_authorizes_several_uploads() {
    let app = TestApp::new();
    let token = app.token(Some(test_user()));

    let first = app.upload_text(&token, "a.txt").await;
    let second = app.upload_text(&token, "b.txt").await;

    assert_eq!(first.nonce_id, second.nonce_id);
    assert_eq!(app.store.nonce_count(), 1);

    let uploads = app.store.uploads_for_nonce(first.nonce_id).await.unwrap();
    let ids: Vec<_> = uploads.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_storage_paths_are_nonce_scoped() {
    let app = TestApp::new();

    let first = app.upload_text(&app.token(None), "same.txt").await;
    let second = app.upload_text(&app.token(None), "same.txt").await;

    assert_ne!(first.uri, second.uri);
    assert_eq!(app.storage.len(), 2);
}

#[tokio::test]
async fn test_same_filename_twice_under_one_nonce_is_rejected() {
    let app = TestApp::new();
    let token = app.token(Some(test_user()));
    let uploads = app.state.uploads();

    let first = uploads
        .upload(Some(&token), UploadType::Generic, "photo.txt", None, b"first")
        .await
        .unwrap();

    let err = uploads
        .upload(Some(&token), UploadType::Generic, "photo.txt", None, b"second")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert!(err.is_client_error());

    // Names that sanitize to the same path collide too.
    let err = uploads
        .upload(Some(&token), UploadType::Generic, "../photo.txt", None, b"third")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));

    assert_eq!(
        app.storage.contents(&first.upload.uri).as_deref(),
        Some(&b"first"[..])
    );
    assert_eq!(app.storage.len(), 1);
    assert_eq!(app.store.upload_count(), 1);
}

#[tokio::test]
async fn test_overlong_filename_is_stored_sanitized() {
    let app = TestApp::new();
    let token = app.token(None);
    let filename = format!("{}.txt", "x".repeat(300));

    let upload = app.upload_text(&token, &filename).await;

    assert_eq!(upload.filename.len(), 200);
    assert!(upload.filename.starts_with("xxx"));
    assert!(upload.uri.ends_with(&upload.filename));

    let names = app.store.uploads_for_nonce(upload.nonce_id).await.unwrap();
    assert_eq!(names[0].filename, upload.filename);
}

/// Datastore where another request persists the same nonce key for a
/// different user just before the upload is recorded.
struct ContestedStore {
    inner: MemoryDatastore,
    rival: Uuid,
}

#[async_trait]
impl Datastore for ContestedStore {
    async fn find_nonce(&self, key: &str) -> StoreResult<Option<Nonce>> {
        self.inner.find_nonce(key).await
    }

    async fn nonce_exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.nonce_exists(key).await
    }

    async fn insert_nonce(&self, key: &str, user_id: Option<Uuid>) -> StoreResult<Nonce> {
        self.inner.insert_nonce(key, user_id).await
    }

    async fn record_upload(&self, nonce: &Nonce, upload: NewUpload) -> StoreResult<(Nonce, Upload)> {
        if !self.inner.nonce_exists(&nonce.key).await? {
            self.inner.insert_nonce(&nonce.key, Some(self.rival)).await?;
        }
        self.inner.record_upload(nonce, upload).await
    }

    async fn uploads_for_nonce(&self, nonce_id: i64) -> StoreResult<Vec<Upload>> {
        self.inner.uploads_for_nonce(nonce_id).await
    }

    async fn find_upload(&self, nonce_id: i64, upload_id: i64) -> StoreResult<Option<Upload>> {
        self.inner.find_upload(nonce_id, upload_id).await
    }

    async fn check_health(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_nonce_taken_by_another_user_removes_written_file() {
    let store = Arc::new(ContestedStore {
        inner: MemoryDatastore::new(),
        rival: Uuid::now_v7(),
    });
    let storage = Arc::new(MemoryFileStorage::new("/files"));
    let state = AppState::from_parts(
        &NonceSettings::new(TEST_SECRET),
        Arc::clone(&store) as Arc<dyn Datastore>,
        Arc::clone(&storage) as Arc<dyn FileStorage>,
        TEST_MAX_UPLOAD_SIZE,
    )
    .unwrap();

    let token = state.authority().generate("", Some(test_user())).unwrap();
    let err = state
        .uploads()
        .upload(Some(&token), UploadType::Generic, "a.txt", None, b"hello")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Nonce(NonceError::UserMismatch)));
    assert_eq!(
        err.to_string(),
        "The current user does not have access to the specified nonce."
    );
    assert!(storage.is_empty());
    assert_eq!(store.inner.upload_count(), 0);
    assert_eq!(store.inner.nonce_count(), 1);
}

#[tokio::test]
async fn test_upload_without_nonce_fails() {
    let app = TestApp::new();

    let err = app
        .state
        .uploads()
        .upload(None, UploadType::Generic, "a.txt", None, b"hello")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Nonce(NonceError::MissingToken)));
    assert_eq!(err.to_string(), "No nonce was provided.");
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn test_empty_and_oversized_files_rejected() {
    let app = TestApp::new();
    let token = app.token(None);
    let uploads = app.state.uploads();

    let err = uploads
        .upload(Some(&token), UploadType::Generic, "empty.txt", None, b"")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Empty file");

    let big = vec![b'a'; TEST_MAX_UPLOAD_SIZE + 1];
    let err = uploads
        .upload(Some(&token), UploadType::Generic, "big.txt", None, &big)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("File too large"));

    assert_eq!(app.store.nonce_count(), 0);
}
