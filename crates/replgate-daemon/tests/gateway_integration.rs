#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests of the HTTP gateway against a real subprocess.
//!
//! `cat` stands in for the REPL: it echoes every submitted byte, so code that
//! contains a marker line produces that marker on stdout. Each code sample
//! starts with a newline so the terminator echoed by the previous command
//! ends up on its own line.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use replgate_daemon::bridge::{BridgeSettings, ReplBridge};
use replgate_daemon::lifecycle::SessionState;
use replgate_daemon::server::{AppState, Gateway, build_router};
use replgate_daemon::subprocess::{ProcessHandle, SpawnConfig};

struct Stack {
    app: Router,
    bridge: ReplBridge,
    process: ProcessHandle,
}

fn start_cat(timeout: Duration) -> Stack {
    let (process, streams) = ProcessHandle::spawn(&SpawnConfig::new("cat", Vec::new())).unwrap();
    let bridge = ReplBridge::start_with(
        streams.stdin,
        streams.stdout,
        streams.stderr,
        tokio::io::sink(),
        tokio::io::sink(),
        Arc::new(process.signaller()),
        &BridgeSettings {
            buffer_size: 8,
            quit_command: "\n-> quit\n".to_string(),
            drain_warn_interval: Duration::from_secs(2),
            late_result_window: Duration::from_millis(20),
        },
    );
    let gateway = Gateway::new(bridge.dispatcher(), bridge.lifecycle(), timeout);
    let app = build_router(AppState {
        gateway: Arc::new(gateway),
    });
    Stack {
        app,
        bridge,
        process,
    }
}

/// Send a request to the app and return (status, body text).
async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn post(app: &Router, query: &serde_json::Value) -> (StatusCode, String) {
    send(app, "POST", "/", &query.to_string()).await
}

#[tokio::test]
async fn get_is_bad_request() {
    let stack = start_cat(Duration::from_secs(2));
    let (status, text) = send(&stack.app, "GET", "/", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "Bad request\n");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let stack = start_cat(Duration::from_secs(2));
    let (status, text) = send(&stack.app, "POST", "/", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "Bad request\n");
}

#[tokio::test]
async fn stdout_query_returns_marker_payload() {
    let stack = start_cat(Duration::from_secs(2));
    let (status, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "\n-> hello world\n", "Stdout": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "hello world");
}

#[tokio::test]
async fn error_line_is_returned_whole() {
    let stack = start_cat(Duration::from_secs(2));
    let (status, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "\nERROR: syntax error\n", "Stdout": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ERROR: syntax error");
}

#[tokio::test]
async fn any_path_is_served() {
    let stack = start_cat(Duration::from_secs(2));
    let body = serde_json::json!({"code": "\n-> lower\n", "stdout": true}).to_string();
    let (status, text) = send(&stack.app, "POST", "/eval/anything", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "lower");
}

#[tokio::test]
async fn silent_query_returns_empty_body_and_does_not_leak() {
    let stack = start_cat(Duration::from_secs(2));
    let (status, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "\n-> stale\n", "Stdout": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "\n-> fresh\n", "Stdout": true}),
    )
    .await;
    assert_eq!(text, "fresh");
}

#[tokio::test]
async fn missing_marker_times_out_then_recovers() {
    let stack = start_cat(Duration::from_millis(100));
    let (status, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "no marker here", "Stdout": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Timeout");

    let (status, text) = post(
        &stack.app,
        &serde_json::json!({"Code": "\n-> next\n", "Stdout": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "next");
}

#[tokio::test]
async fn kill_lets_the_repl_exit_cleanly() {
    let mut stack = start_cat(Duration::from_secs(2));
    let lifecycle = stack.bridge.lifecycle();

    let (status, text) = post(&stack.app, &serde_json::json!({"Kill": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "");

    let exit = tokio::time::timeout(Duration::from_secs(5), stack.process.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(exit.success());
    stack.bridge.supervise().await.unwrap();

    assert_eq!(lifecycle.state(), SessionState::Terminating);
    let (status, _) = post(
        &stack.app,
        &serde_json::json!({"Code": "\n-> late\n", "Stdout": true}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
