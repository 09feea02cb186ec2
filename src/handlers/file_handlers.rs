//! Serving merged files and answering existence checks.

use crate::{
    errors::AppError,
    services::{
        fsutil::is_safe_id,
        merge_engine::{WAV_CONTENT_TYPE, artifact_path, local_download_url},
        object_store::wav_key,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;
use std::io::ErrorKind;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, Serialize, PartialEq)]
pub struct CheckResponse {
    pub exists: bool,
    pub url: Option<String>,
    pub source: Option<&'static str>,
}

/// `GET /download/{fileId}`: the local artifact as a stream, else the object store copy.
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    if !is_safe_id(&file_id) {
        return Err(AppError::not_found(format!("file `{}` not found", file_id)));
    }

    let path = artifact_path(&state.config.local_files_dir(), &file_id);
    match File::open(&path).await {
        Ok(file) => {
            let size = file.metadata().await.map_err(|e| AppError::internal(e.to_string()))?.len();
            let body = Body::from_stream(ReaderStream::new(file));
            return Ok(wav_response(body, size, &file_id));
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(AppError::internal(err.to_string())),
    }

    match state.objects.get(&wav_key(&file_id)).await {
        Some(bytes) => {
            let size = bytes.len() as u64;
            Ok(wav_response(Body::from(bytes), size, &file_id))
        }
        None => Err(AppError::not_found(format!("file `{}` not found", file_id))),
    }
}

/// `GET /check/{fileId}`: cached URL, then local disk, then the object store.
pub async fn check(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Json<CheckResponse> {
    if !is_safe_id(&file_id) {
        return Json(CheckResponse::missing());
    }
    if let Some(url) = state.cache.get(&file_id) {
        return Json(CheckResponse::found(url, "cache"));
    }

    let local = artifact_path(&state.config.local_files_dir(), &file_id);
    match tokio::fs::try_exists(&local).await {
        Ok(true) => return Json(CheckResponse::found(local_download_url(&file_id), "local")),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(
                file_id = %file_id,
                path = %local.display(),
                error = %err,
                "local lookup failed, checking object store"
            );
        }
    }

    let key = wav_key(&file_id);
    if state.objects.exists(&key).await {
        let url = state
            .objects
            .download_url(&key)
            .await
            .unwrap_or_else(|| local_download_url(&file_id));
        state.cache.insert(file_id.as_str(), url.as_str());
        return Json(CheckResponse::found(url, "remote"));
    }

    Json(CheckResponse::missing())
}

impl CheckResponse {
    fn found(url: String, source: &'static str) -> Self {
        Self {
            exists: true,
            url: Some(url),
            source: Some(source),
        }
    }

    fn missing() -> Self {
        Self {
            exists: false,
            url: None,
            source: None,
        }
    }
}

fn wav_response(body: Body, size: u64, file_id: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(WAV_CONTENT_TYPE));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}.wav\"", file_id)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}
