use crate::services::{
    chunk_store::ChunkError, merge_engine::MergeError, object_store::StorageError,
    share_registry::ShareError,
};
use axum::{
    Json,
    extract::{
        FromRequest, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;

/// Error returned by every handler, rendered as
/// `{"success": false, "error": ..., "status": ..., "detail": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let mut body = json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

/// Malformed or incomplete JSON bodies are validation errors. Oversized
/// bodies keep their 413.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        AppError::new(status, format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::bad_request(format!("Invalid multipart body: {}", rejection.body_text()))
    }
}

/// JSON body extractor that rejects with [`AppError`] instead of axum's plain-text 422.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state).await?;
        Ok(Self(inner))
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::not_found(err.to_string()),
            StorageError::InvalidObjectKey => AppError::bad_request(err.to_string()),
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<ChunkError> for AppError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Validation(_) => AppError::bad_request(err.to_string()),
            ChunkError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            ChunkError::SessionNotFound(_) => AppError::not_found(err.to_string()),
            ChunkError::CorruptManifest { .. } | ChunkError::Io(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<MergeError> for AppError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Chunk(inner) => inner.into(),
            MergeError::TotalMismatch { .. } => AppError::bad_request(err.to_string()),
            MergeError::Incomplete { ref missing } => {
                let detail = json!({ "missingChunks": missing });
                AppError::bad_request(err.to_string()).with_detail(detail)
            }
            MergeError::MissingChunkFiles { ref missing } => {
                let detail = json!({ "missingChunks": missing });
                AppError::internal(err.to_string()).with_detail(detail)
            }
            MergeError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::NotFound(_) | ShareError::FileNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            ShareError::Expired(_) => AppError::new(StatusCode::GONE, err.to_string()),
            ShareError::InvalidFileId(_) => AppError::bad_request(err.to_string()),
            ShareError::Storage(inner) => inner.into(),
            ShareError::Corrupt { .. } | ShareError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}
