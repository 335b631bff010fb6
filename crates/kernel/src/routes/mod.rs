//! HTTP route handlers.

pub mod health;
pub mod upload;

use axum::Router;
use axum::extract::DefaultBodyLimit;

use crate::state::AppState;

/// Room for multipart framing and the nonce field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router with state applied.
pub fn app(state: AppState) -> Router {
    let body_limit = state.max_upload_size().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(health::router())
        .merge(upload::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
