//! HTTP surface of the service.
//!
//! - **Uploads**
//!   - `POST   /upload-chunk`      multipart chunk intake
//!   - `POST   /merge-chunks`      assemble a completed session
//! - **Shares**
//!   - `POST   /share`             create a 24 h share link
//!   - `GET    /share/{id}`        resolve (404 unknown, 410 expired)
//!   - `DELETE /share/{id}`        remove
//! - **Files**
//!   - `GET    /download/{fileId}` stream a merged WAV
//!   - `GET    /check/{fileId}`    where a merged file can be fetched
//! - **Maintenance**
//!   - `GET    /cleanup`           run the expiry sweep now
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        cleanup_handlers::cleanup,
        file_handlers::{check, download},
        health_handlers::{healthz, readyz},
        share_handlers::{create_share, delete_share, get_share},
        upload_handlers::{merge_chunks, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `body_limit` caps every request body, chunk uploads included.
pub fn routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload-chunk", post(upload_chunk))
        .route("/merge-chunks", post(merge_chunks))
        .route("/share", post(create_share))
        .route("/share/{id}", get(get_share).delete(delete_share))
        .route("/download/{file_id}", get(download))
        .route("/check/{file_id}", get(check))
        .route("/cleanup", get(cleanup))
        .layer(DefaultBodyLimit::max(body_limit))
}
