//! Chunked upload, merge and time-limited sharing of WAV files backed by an
//! S3-compatible object store.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// The full application router with state attached.
pub fn build_app(state: AppState) -> Router {
    routes::routes::routes(state.config.body_limit()).with_state(state)
}
