use axum::http::StatusCode;
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use wavshare::{
    build_app,
    config::AppConfig,
    models::share::ShareOptions,
    services::{
        merge_engine::artifact_path,
        object_store::{local::LocalBackend, wav_key},
    },
    state::AppState,
};

const CLEANUP_KEY: &str = "test-cleanup-key";

struct TestApp {
    _dir: TempDir,
    state: AppState,
    server: TestServer,
}

fn setup(allow_internal_trigger: bool) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::local(dir.path().join("tmp"));
    config.cleanup_api_key = Some(CLEANUP_KEY.into());
    config.allow_internal_trigger = allow_internal_trigger;

    let backend = Arc::new(LocalBackend::new(config.objects_dir()));
    let state = AppState::new(config, backend);
    let server = TestServer::new(build_app(state.clone())).expect("Failed to create test server");
    TestApp {
        _dir: dir,
        state,
        server,
    }
}

fn chunk_form(client_file_id: &str, index: u32, total: u32, bytes: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("clientFileId", client_file_id)
        .add_text("chunkIndex", index.to_string())
        .add_text("totalChunks", total.to_string())
        .add_text("originalName", "song.wav")
        .add_part(
            "file",
            Part::bytes(bytes)
                .file_name(format!("chunk-{index}"))
                .mime_type("application/octet-stream"),
        )
}

fn chunk_bytes(index: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u32).wrapping_add(index * 7) as u8).collect()
}

async fn upload_and_merge(app: &TestApp, file_id: &str, chunks: &[Vec<u8>]) -> Value {
    let total = chunks.len() as u32;
    for index in (0..total).rev() {
        let response = app
            .server
            .post("/upload-chunk")
            .multipart(chunk_form(file_id, index, total, chunks[index as usize].clone()))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = app
        .server
        .post("/merge-chunks")
        .json(&json!({ "clientFileId": file_id, "totalChunks": total, "fileName": "song.wav" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json()
}

#[tokio::test]
async fn test_upload_merge_and_download() {
    let app = setup(true);
    let chunks: Vec<Vec<u8>> = (0..3).map(|i| chunk_bytes(i, 4096 + i as usize)).collect();

    let merged = upload_and_merge(&app, "song-1", &chunks).await;
    assert_eq!(merged["success"], true);
    assert_eq!(merged["fileId"], "song-1");
    assert_eq!(merged["r2Success"], true);
    assert_eq!(merged["storedLocally"], true);
    assert_eq!(merged["fileSize"], 3 * 4096 + 3);

    let response = app.server.get("/download/song-1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), "audio/wav");
    assert_eq!(response.as_bytes().as_ref(), chunks.concat().as_slice());

    let check: Value = app.server.get("/check/song-1").await.json();
    assert_eq!(check["exists"], true);
    assert!(check["url"].is_string());

    let staging = app.state.config.chunks_dir().join("song-1");
    assert!(!staging.exists());
}

#[tokio::test]
async fn test_chunk_receipt_tracks_progress() {
    let app = setup(true);

    let response = app
        .server
        .post("/upload-chunk")
        .multipart(chunk_form("progress", 1, 2, vec![1, 2, 3]))
        .await;
    let receipt: Value = response.json();
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["chunkIndex"], 1);
    assert_eq!(receipt["receivedChunks"], 1);
    assert_eq!(receipt["totalChunks"], 2);
    assert_eq!(receipt["isComplete"], false);

    let response = app
        .server
        .post("/merge-chunks")
        .json(&json!({ "clientFileId": "progress", "totalChunks": 2, "fileName": "a.wav" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["detail"]["missingChunks"], json!([0]));
}

#[tokio::test]
async fn test_oversized_chunk_is_rejected_without_writing() {
    let app = setup(true);
    let oversized = vec![0u8; 11 * 1024 * 1024];

    let response = app
        .server
        .post("/upload-chunk")
        .multipart(chunk_form("big", 0, 1, oversized))
        .await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!app.state.config.chunks_dir().join("big").exists());
}

#[tokio::test]
async fn test_chunk_one_byte_over_the_limit_is_rejected() {
    let app = setup(true);
    let oversized = vec![0u8; app.state.config.max_chunk_bytes + 1];

    let response = app
        .server
        .post("/upload-chunk")
        .multipart(chunk_form("edge", 0, 1, oversized))
        .await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], 413);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("exceeds")));
    assert!(!app.state.config.chunks_dir().join("edge").exists());
}

fn assert_json_bad_request(response: &axum_test::TestResponse) {
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(
        response
            .header("content-type")
            .to_str()
            .is_ok_and(|ct| ct.starts_with("application/json"))
    );
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], 400);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_malformed_bodies_return_json_errors() {
    let app = setup(true);

    let response = app
        .server
        .post("/merge-chunks")
        .json(&json!({ "totalChunks": 1, "fileName": "a.wav" }))
        .await;
    assert_json_bad_request(&response);
    assert!(response.json::<Value>()["error"].as_str().is_some_and(|e| e.contains("clientFileId")));

    let response = app
        .server
        .post("/share")
        .json(&json!({ "fileName": "a.wav" }))
        .await;
    assert_json_bad_request(&response);

    let response = app.server.post("/upload-chunk").text("not a form").await;
    assert_json_bad_request(&response);

    let response = app.server.post("/merge-chunks").text("{").await;
    assert_json_bad_request(&response);
}

#[tokio::test]
async fn test_invalid_upload_fields() {
    let app = setup(true);

    let response = app
        .server
        .post("/upload-chunk")
        .multipart(chunk_form("../escape", 0, 1, vec![1]))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/upload-chunk")
        .multipart(chunk_form("ok", 3, 2, vec![1]))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let form = MultipartForm::new()
        .add_text("clientFileId", "ok")
        .add_text("chunkIndex", "zero")
        .add_text("totalChunks", "1")
        .add_part("file", Part::bytes(vec![1]));
    let response = app.server.post("/upload-chunk").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_share_is_not_found() {
    let app = setup(true);

    let response = app.server.get("/share/nonexistent").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_share_lifecycle() {
    let app = setup(true);
    upload_and_merge(&app, "shared", &[chunk_bytes(0, 64)]).await;

    let response = app
        .server
        .post("/share")
        .json(&json!({ "fileId": "shared", "fileName": "song.wav" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let created: Value = response.json();
    let share_id = created["shareId"].as_str().expect("shareId").to_string();
    assert_eq!(created["shareUrl"], format!("/share/{share_id}"));

    let resolved: Value = app.server.get(&format!("/share/{share_id}")).await.json();
    assert_eq!(resolved["success"], true);
    assert_eq!(resolved["fileId"], "shared");
    assert_eq!(resolved["fileName"], "song.wav");
    assert_eq!(resolved["downloadUrl"], "/download/shared");

    let response = app.server.delete(&format!("/share/{share_id}")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let response = app.server.get(&format!("/share/{share_id}")).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_share_for_missing_file_is_not_found() {
    let app = setup(true);
    let response = app
        .server
        .post("/share")
        .json(&json!({ "fileId": "ghost" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_share_is_gone() {
    let app = setup(true);
    upload_and_merge(&app, "old", &[chunk_bytes(0, 64)]).await;
    let record = app
        .state
        .shares
        .create_at("old", ShareOptions::default(), Utc::now() - Duration::hours(25))
        .await
        .expect("create share");

    let response = app.server.get(&format!("/share/{}", record.share_id)).await;
    assert_eq!(response.status_code(), StatusCode::GONE);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_cleanup_requires_authorization() {
    let app = setup(false);

    let response = app.server.get("/cleanup").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .get("/cleanup")
        .add_header("x-api-key", "wrong")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .get("/cleanup")
        .add_header("x-internal-trigger", "true")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .get("/cleanup")
        .add_header("x-api-key", CLEANUP_KEY)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["objects"]["deleted"], 0);
}

#[tokio::test]
async fn test_cleanup_internal_trigger_keeps_fresh_files() {
    let app = setup(true);
    upload_and_merge(&app, "fresh", &[chunk_bytes(0, 64)]).await;

    let response = app
        .server
        .get("/cleanup")
        .add_header("x-internal-trigger", "true")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["objects"]["scanned"], 1);
    assert_eq!(body["objects"]["deleted"], 0);
    assert_eq!(body["localFiles"]["deleted"], 0);
    assert!(artifact_path(&app.state.config.local_files_dir(), "fresh").exists());
}

#[tokio::test]
async fn test_download_and_check_unknown_file() {
    let app = setup(true);

    let response = app.server.get("/download/missing").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let check: Value = app.server.get("/check/missing").await.json();
    assert_eq!(check, json!({ "exists": false, "url": null, "source": null }));
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = setup(true);

    let response = app.server.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = app.server.get("/readyz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "local");
    assert_eq!(body["checks"]["objectStore"]["ok"], true);
}

#[tokio::test]
async fn test_check_falls_through_when_local_lookup_fails() {
    let app = setup(true);
    // A regular file where the artifact directory should be makes the lookup error out.
    let local_files = app.state.config.local_files_dir();
    std::fs::create_dir_all(&app.state.config.tmp_dir).expect("tmp dir");
    std::fs::write(&local_files, b"not a directory").expect("blocker file");

    assert!(
        app.state
            .objects
            .put(
                &wav_key("remote-only"),
                bytes::Bytes::from_static(b"RIFF"),
                Default::default(),
                "audio/wav",
            )
            .await
    );

    let check: Value = app.server.get("/check/remote-only").await.json();
    assert_eq!(check["exists"], true);
    assert_eq!(check["source"], "remote");
    assert_eq!(check["url"], "/download/remote-only");
}
