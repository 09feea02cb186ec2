//! Manually triggered expiry sweep.

use crate::{errors::AppError, models::sweep::SweepSummary, state::AppState};
use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;

const API_KEY_HEADER: &str = "x-api-key";
const INTERNAL_TRIGGER_HEADER: &str = "x-internal-trigger";

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: SweepSummary,
}

/// `GET /cleanup`
pub async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, AppError> {
    if !is_authorized(&state, &headers) {
        tracing::warn!("rejected unauthorized cleanup request");
        return Err(AppError::unauthorized("unauthorized"));
    }

    let summary = state.sweeper.sweep().await;
    Ok(Json(CleanupResponse {
        success: true,
        summary,
    }))
}

fn is_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let (Some(expected), Some(given)) = (state.config.cleanup_api_key.as_deref(), header(API_KEY_HEADER)) {
        if expected == given {
            return true;
        }
    }
    state.config.allow_internal_trigger && header(INTERNAL_TRIGGER_HEADER) == Some("true")
}
