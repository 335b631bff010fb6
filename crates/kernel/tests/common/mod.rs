#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every [`TestApp`] runs the real kernel services on top of the in-memory
//! datastore and storage, so tests don't need PostgreSQL.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use tether_kernel::AppState;
use tether_kernel::file::{FileStorage, MemoryFileStorage};
use tether_kernel::models::{Upload, UploadType};
use tether_kernel::nonce::{NonceAuthority, NonceSettings};
use tether_kernel::routes;
use tether_kernel::store::{Datastore, MemoryDatastore};
use tether_test_utils::MultipartBuilder;

/// Signing secret shared by all tests.
pub const TEST_SECRET: &str = "tether-test-secret";

/// Upload size limit used by tests.
pub const TEST_MAX_UPLOAD_SIZE: usize = 1024 * 1024;

/// Test application wired to in-memory backends.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryDatastore>,
    pub storage: Arc<MemoryFileStorage>,
}

impl TestApp {
    /// Create a new test application with the default max nonce age.
    pub fn new() -> Self {
        Self::with_settings(NonceSettings::new(TEST_SECRET))
    }

    /// Create a new test application with explicit nonce settings.
    pub fn with_settings(settings: NonceSettings) -> Self {
        let store = Arc::new(MemoryDatastore::new());
        let storage = Arc::new(MemoryFileStorage::new("/files"));

        let state = AppState::from_parts(
            &settings,
            Arc::clone(&store) as Arc<dyn Datastore>,
            Arc::clone(&storage) as Arc<dyn FileStorage>,
            TEST_MAX_UPLOAD_SIZE,
        )
        .expect("Failed to build test state");

        Self {
            router: routes::app(state.clone()),
            state,
            store,
            storage,
        }
    }

    /// Get the nonce authority.
    pub fn authority(&self) -> &Arc<NonceAuthority> {
        self.state.authority()
    }

    /// Issue a token and upload a text file with it.
    pub async fn upload_text(&self, token: &str, filename: &str) -> Upload {
        self.state
            .uploads()
            .upload(
                Some(token),
                UploadType::Generic,
                filename,
                Some("text/plain"),
                b"hello",
            )
            .await
            .expect("Failed to upload test file")
            .upload
    }

    /// Generate a token for `user`.
    pub fn token(&self, user: Option<Uuid>) -> String {
        self.authority()
            .generate("", user)
            .expect("Failed to generate token")
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Post a multipart body.
    pub async fn post_multipart(&self, uri: &str, body: MultipartBuilder) -> Response {
        let content_type = body.content_type();
        self.request(
            Request::post(uri)
                .header("content-type", content_type)
                .body(Body::from(body.build()))
                .unwrap(),
        )
        .await
    }
}

/// Collect a response body as JSON.
pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("Response body is not JSON")
}
