use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use fuzzdeck_orchestration::{Coordinator, OrchestratorConfig, ToolBinaries};
use fuzzdeck_server::{create_router, AppState};
use fuzzdeck_storage::MemoryJobStore;

const BOUNDARY: &str = "fuzzdeck-test-boundary";

/// `zzuf` stand-in: passes stdin through unchanged
fn fake_zzuf() -> &'static Path {
    static BIN: OnceLock<PathBuf> = OnceLock::new();
    BIN.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap().into_path();
        let path = dir.join("zzuf");
        std::fs::write(&path, "#!/bin/sh\ncat\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
}

fn create_test_app(data_dir: &Path) -> Router {
    let config = OrchestratorConfig {
        data_dir: data_dir.to_path_buf(),
        sample_interval_ms: 20,
        block_throttle_ms: 10,
        binaries: ToolBinaries {
            zzuf: fake_zzuf().display().to_string(),
            ..ToolBinaries::default()
        },
        ..OrchestratorConfig::default()
    };
    let coordinator = Coordinator::new(config, Arc::new(MemoryJobStore::new()));
    create_router(AppState::new(Arc::new(coordinator)))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_multipart(uri: &str, fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    let (name, filename, bytes) = file;
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, name, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn given_running_server_when_health_check_then_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, body) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn given_unknown_tool_when_submitting_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, body) = send_json(&app, post_json("/api/fuzz/honggfuzz", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Unknown tool"));
    assert_eq!(body["category"], "permanent");
}

#[tokio::test]
async fn given_target_without_fuzz_when_submitting_ffuf_then_returns_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, body) = send_json(
        &app,
        post_json("/api/fuzz/ffuf", r#"{"target": "http://example.test/"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Target must include FUZZ"));
}

#[tokio::test]
async fn given_non_json_body_when_submitting_ffuf_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let request = Request::builder()
        .method("POST")
        .uri("/api/fuzz/ffuf")
        .body(Body::from("target=x"))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn given_missing_upload_when_submitting_zzuf_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let request = post_multipart("/api/fuzz/zzuf", &[("ratio", "0.1")], ("other", "", b""));
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("No file uploaded"));
}

#[tokio::test]
async fn given_unknown_job_when_reading_then_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, body) = send_json(&app, get("/api/fuzz/afl/jobs/afl_404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("afl_404"));

    let (status, _) = send_json(&app, get("/api/fuzz/afl/jobs/afl_404/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn given_stop_requests_then_unknown_jobs_are_not_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send_json(&app, delete("/api/fuzz/ffuf")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(&app, delete("/api/fuzz/ffuf?jobId=ffuf_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Job ffuf_1 not found; nothing to stop");
}

#[tokio::test]
async fn given_invalid_artifact_type_when_downloading_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());

    let (status, _) = send_json(&app, get("/api/fuzz/zzuf/artifacts?jobId=zzuf_1&type=crashes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, get("/api/fuzz/zzuf/artifacts?jobId=zzuf_1&type=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, get("/api/fuzz/zzuf/artifacts")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_zzuf_upload_when_job_completes_then_record_events_and_download_agree() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(dir.path());
    let input: &[u8] = b"\x89PNG fake image bytes";

    let request = post_multipart(
        "/api/fuzz/zzuf",
        &[("ratio", "0.2"), ("seed", "11")],
        ("file", "img.bin", input),
    );
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("zzuf_"));
    assert!(body["pid"].as_u64().is_some());

    let record = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (_, record) = send_json(&app, get(&format!("/api/fuzz/zzuf/jobs/{}", job_id))).await;
            if record["status"] == "completed" || record["status"] == "failed" {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(record["status"], "completed", "{}", record);
    assert_eq!(record["stats"]["seed"], 11);
    assert_eq!(record["stats"]["fuzzedSize"], input.len());

    let (status, headers, bytes) = send(
        &app,
        get(&format!("/api/fuzz/zzuf/artifacts?jobId={}", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"fuzzed_img.bin\""
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(bytes, input);

    // Terminal job: one snapshot, then the stream ends
    let (status, headers, events) = send(
        &app,
        get(&format!("/api/fuzz/zzuf/jobs/{}/events", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let events = String::from_utf8(events).unwrap();
    assert_eq!(events.matches("event: record").count(), 1);
    assert!(events.contains("\"status\":\"completed\""));
}
