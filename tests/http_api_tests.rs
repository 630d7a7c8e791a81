// Integration tests for the HTTP control API
//
// Requests go through the full router with `oneshot`, backed by a
// scripted capture source and a temporary output directory.

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{media, scripted_controller, wait_for_appended, Script};
use instant_replay::{create_router, AppState, DirectorySink, Exporter, SharedStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    state: AppState,
    script: Script,
    store: SharedStore,
    output: TempDir,
}

impl TestApp {
    fn new() -> Result<Self> {
        let (controller, script, store) = scripted_controller();
        let output = TempDir::new()?;
        let exporter = Exporter::new("replay", controller.container().clone());
        let sink = Arc::new(DirectorySink::new(output.path()));

        Ok(Self {
            state: AppState::new(controller, exporter, sink),
            script,
            store,
            output,
        })
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Vec<u8>)> {
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => Request::builder().method(method).uri(uri).body(Body::empty())?,
        };

        let response = self.router().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, bytes.to_vec()))
    }

    async fn send_json(&self, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let (status, bytes) = self.send(method, uri, body).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app.send("GET", "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
    Ok(())
}

#[tokio::test]
async fn test_status_reports_idle_and_empty_buffer() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app.send_json("GET", "/replay/status", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capture"]["status"], "idle");
    assert_eq!(body["buffer"]["segment_count"], 0);
    assert_eq!(body["buffer"]["capacity_secs"], 15);
    assert_eq!(body["buffer"]["min_capacity_secs"], 5);
    assert_eq!(body["buffer"]["max_capacity_secs"], 30);
    Ok(())
}

#[tokio::test]
async fn test_save_with_empty_buffer_is_conflict() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app.send_json("POST", "/replay/save", None).await?;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"]["kind"], "empty_buffer");

    let (status, _) = app.send_json("POST", "/replay/save/disk", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_capacity_outside_range_is_rejected() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app
        .send_json("PUT", "/replay/capacity", Some(json!({ "capacity_secs": 45 })))
        .await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"]["kind"], "invalid_capacity");
    assert_eq!(body["detail"]["requested"], 45);
    assert_eq!(body["detail"]["max"], 30);

    // The previous capacity stays in force
    assert_eq!(app.store.read().await.capacity_secs(), 15);
    Ok(())
}

#[tokio::test]
async fn test_capacity_update() -> Result<()> {
    let app = TestApp::new()?;
    let (status, body) = app
        .send_json("PUT", "/replay/capacity", Some(json!({ "capacity_secs": 10 })))
        .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capacity_secs"], 10);
    assert_eq!(body["evicted"], 0);
    assert_eq!(app.store.read().await.capacity_secs(), 10);
    Ok(())
}

#[tokio::test]
async fn test_capture_and_download_replay() -> Result<()> {
    let app = TestApp::new()?;

    let (status, body) = app.send_json("POST", "/replay/start", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capture"]["status"], "capturing");

    app.script.emit(media(1, b'a'), 1000).await?;
    app.script.emit(media(1, b'b'), 2000).await?;
    wait_for_appended(&app.store, 2).await;

    let request = Request::builder()
        .method("POST")
        .uri("/replay/save")
        .body(Body::empty())?;
    let response = app.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");

    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str()?.to_string();
    assert!(disposition.starts_with("attachment; filename=\"replay-"));
    assert!(disposition.ends_with(".webm\""));

    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let mut expected = media(1, b'a');
    expected.extend(media(1, b'b'));
    assert_eq!(bytes.to_vec(), expected);

    // Saving does not disturb capture or the buffer
    let (_, body) = app.send_json("GET", "/replay/status", None).await?;
    assert_eq!(body["capture"]["status"], "capturing");
    assert_eq!(body["buffer"]["segment_count"], 2);

    let (status, body) = app.send_json("POST", "/replay/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capture"]["status"], "idle");
    Ok(())
}

#[tokio::test]
async fn test_save_to_disk_writes_artifact() -> Result<()> {
    let app = TestApp::new()?;
    app.send("POST", "/replay/start", None).await?;
    app.script.emit(media(2, b'a'), 2000).await?;
    wait_for_appended(&app.store, 1).await;

    let (status, body) = app.send_json("POST", "/replay/save/disk", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["segment_count"], 1);
    assert_eq!(body["bytes"], 2000);
    assert_eq!(body["mime_type"], "video/webm");

    let filename = body["filename"].as_str().unwrap_or_default();
    let written = std::fs::read(app.output.path().join(filename))?;
    assert_eq!(written, media(2, b'a'));

    app.send("POST", "/replay/stop", None).await?;
    Ok(())
}

#[tokio::test]
async fn test_clear_drops_segments() -> Result<()> {
    let app = TestApp::new()?;
    app.send("POST", "/replay/start", None).await?;
    app.script.emit(media(1, b'a'), 1000).await?;
    wait_for_appended(&app.store, 1).await;

    let (status, body) = app.send_json("POST", "/replay/clear", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 1);
    assert_eq!(body["buffer"]["segment_count"], 0);

    let (status, _) = app.send_json("POST", "/replay/save", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    app.send("POST", "/replay/stop", None).await?;
    Ok(())
}

#[tokio::test]
async fn test_start_failure_maps_to_bad_gateway() -> Result<()> {
    let app = TestApp::new()?;
    app.script.fail_next_acquire();

    let (status, body) = app.send_json("POST", "/replay/start", None).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["detail"]["kind"], "source");
    Ok(())
}
