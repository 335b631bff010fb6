//! Tether Kernel Library
//!
//! Signed upload nonces, nonce-authorized uploads, and the form glue that
//! keeps uploaded and saved files attached across multi-step forms.
//! The main entry point for running the server is the `tether` binary.

pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod form;
pub mod models;
pub mod nonce;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
