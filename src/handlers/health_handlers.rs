//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk I/O and an object store round trip

use crate::{
    services::{fsutil::TMP_PREFIX, object_store::TEST_PREFIX},
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::fs;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Write/read/delete a probe file under the tmp directory.
/// 2. Put/get/delete a `test/` object through the configured backend.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (disk_check, object_check) =
        futures::join!(check_disk(&state), check_object_store(&state));
    let overall_ok = disk_check.ok && object_check.ok;

    let mut checks = BTreeMap::new();
    checks.insert("disk", disk_check);
    checks.insert("objectStore", object_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        backend: state.objects.backend_name(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_disk(state: &AppState) -> CheckStatus {
    let tmp_path = state
        .config
        .tmp_dir
        .join(format!("{}readyz-{}", TMP_PREFIX, Uuid::new_v4()));
    if let Err(e) = fs::create_dir_all(&state.config.tmp_dir).await {
        return CheckStatus::failed(format!("could not create tmp dir: {}", e));
    }
    if let Err(e) = fs::write(&tmp_path, PROBE).await {
        return CheckStatus::failed(format!("could not write tmp file: {}", e));
    }
    let read = fs::read(&tmp_path).await;
    let _ = fs::remove_file(&tmp_path).await;
    match read {
        Ok(bytes) if bytes == PROBE => CheckStatus::passed(),
        Ok(_) => CheckStatus::failed("file content mismatch"),
        Err(e) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
    }
}

async fn check_object_store(state: &AppState) -> CheckStatus {
    let key = format!("{}readyz-{}", TEST_PREFIX, Uuid::new_v4());
    if !state
        .objects
        .put(&key, Bytes::from_static(PROBE), HashMap::new(), "text/plain")
        .await
    {
        return CheckStatus::failed("put failed");
    }
    let read = state.objects.get(&key).await;
    let deleted = state.objects.delete(&key).await;
    match read {
        Some(bytes) if bytes.as_ref() == PROBE && deleted => CheckStatus::passed(),
        Some(bytes) if bytes.as_ref() == PROBE => CheckStatus::failed("delete failed"),
        Some(_) => CheckStatus::failed("object content mismatch"),
        None => CheckStatus::failed("get failed"),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
