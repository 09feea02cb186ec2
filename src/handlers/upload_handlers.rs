//! Chunk intake and merge.

use crate::{
    errors::{AppError, ValidatedJson},
    models::upload::{ChunkReceipt, MergeOutcome},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use bytes::Bytes;
use serde::Deserialize;
use std::str::FromStr;

/// Body of `POST /merge-chunks`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub client_file_id: String,
    pub total_chunks: u32,
    #[serde(default)]
    pub file_name: String,
}

/// `POST /upload-chunk` with multipart fields `file`, `clientFileId`,
/// `chunkIndex`, `totalChunks` and `originalName`.
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChunkReceipt>, AppError> {
    let mut multipart = multipart?;
    let mut file: Option<Bytes> = None;
    let mut client_file_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut original_name = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => file = Some(field.bytes().await?),
            "clientFileId" => client_file_id = Some(field.text().await?),
            "chunkIndex" => chunk_index = Some(parse_number::<u32>(&name, &field.text().await?)?),
            "totalChunks" => total_chunks = Some(parse_number::<u32>(&name, &field.text().await?)?),
            "originalName" => original_name = Some(field.text().await?),
            _ => {}
        }
    }

    let file = file.ok_or_else(|| missing_field("file"))?;
    let client_file_id = client_file_id.ok_or_else(|| missing_field("clientFileId"))?;
    let chunk_index = chunk_index.ok_or_else(|| missing_field("chunkIndex"))?;
    let total_chunks = total_chunks.ok_or_else(|| missing_field("totalChunks"))?;
    let original_name = original_name.unwrap_or_default();

    let receipt = state
        .chunks
        .submit_chunk(
            &client_file_id,
            chunk_index,
            total_chunks,
            &original_name,
            &file,
        )
        .await?;
    Ok(Json(receipt))
}

/// `POST /merge-chunks`
pub async fn merge_chunks(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<MergeRequest>,
) -> Result<Json<MergeOutcome>, AppError> {
    let outcome = state
        .merger
        .merge(&req.client_file_id, req.total_chunks, &req.file_name)
        .await?;
    Ok(Json(outcome))
}

fn parse_number<T: FromStr>(field: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("field `{}` must be a non-negative integer", field)))
}

fn missing_field(field: &str) -> AppError {
    AppError::bad_request(format!("missing multipart field `{}`", field))
}
