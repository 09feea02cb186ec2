//! Share creation, lookup and removal.

use crate::{
    errors::{AppError, ValidatedJson},
    models::share::{ResolvedShare, ShareOptions},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /share`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub file_id: String,
    #[serde(flatten)]
    pub options: ShareOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareResponse {
    pub success: bool,
    pub share_id: String,
    pub share_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ShareBody {
    pub success: bool,
    #[serde(flatten)]
    pub share: ResolvedShare,
}

#[derive(Debug, Serialize)]
pub struct DeleteShareResponse {
    pub success: bool,
    pub existed: bool,
}

/// `POST /share`
pub async fn create_share(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateShareRequest>,
) -> Result<Json<CreateShareResponse>, AppError> {
    let record = state.shares.create(&req.file_id, req.options).await?;
    Ok(Json(CreateShareResponse {
        success: true,
        share_url: format!("/share/{}", record.share_id),
        share_id: record.share_id,
        expires_at: record.expires_at,
    }))
}

/// `GET /share/{id}`: 404 when unknown, 410 once past its lifetime.
pub async fn get_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<Json<ShareBody>, AppError> {
    let share = state.shares.resolve(&share_id).await?;
    Ok(Json(ShareBody {
        success: true,
        share,
    }))
}

/// `DELETE /share/{id}`
pub async fn delete_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<Json<DeleteShareResponse>, AppError> {
    let existed = state.shares.remove(&share_id).await?;
    Ok(Json(DeleteShareResponse {
        success: true,
        existed,
    }))
}
