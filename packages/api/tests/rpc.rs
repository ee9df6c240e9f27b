// ABOUTME: Router-level tests for the JSON-RPC surface and health endpoint
// ABOUTME: Covers dispatch, validation, and error envelopes without a Docker daemon

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bollard::Docker;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use capsule_api::create_router;
use capsule_sandbox::DockerProvider;

/// The client is lazy: building it never touches the daemon, so every test
/// path that stops at the registry works without Docker.
fn app() -> Router {
    let docker = Docker::connect_with_defaults().expect("lazy docker client");
    create_router(Arc::new(DockerProvider::with_client(docker)))
}

async fn rpc(app: Router, body: String) -> Value {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rpc")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn rpc_json(app: Router, body: Value) -> Value {
    rpc(app, body.to_string()).await
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert_eq!(&bytes[..], &b"ok"[..]);
}

#[tokio::test]
async fn test_unknown_method() {
    let resp = rpc_json(
        app(),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "sandbox.v1.destroyAll" }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32601);
    assert_eq!(resp["error"]["message"], "method not found");
    assert_eq!(resp["id"], 1);
}

#[tokio::test]
async fn test_rejects_wrong_jsonrpc_version() {
    let resp = rpc_json(
        app(),
        json!({ "jsonrpc": "1.0", "id": 1, "method": "sandbox.v1.create" }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32001);
}

#[tokio::test]
async fn test_rejects_malformed_body() {
    let resp = rpc(app(), "{not json".to_string()).await;

    assert_eq!(resp["error"]["code"], -32001);
    assert_eq!(resp["error"]["data"]["type"], "INVALID_PARAMS");
}

#[tokio::test]
async fn test_rejects_oversized_body() {
    // just over the 2 MiB request cap
    let padding = "x".repeat((2 << 20) + 16);
    let resp = rpc(app(), padding).await;

    assert_eq!(resp["error"]["code"], -32001);
    assert_eq!(resp["error"]["data"]["type"], "INVALID_PARAMS");
    assert_eq!(resp["error"]["data"]["retryable"], false);
}

#[tokio::test]
async fn test_create_unknown_template() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "sandbox.v1.create",
            "params": { "template": "ruby" },
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32001);
    assert_eq!(resp["error"]["data"]["type"], "INVALID_PARAMS");
    assert_eq!(resp["error"]["data"]["retryable"], false);
    assert!(resp["error"]["data"]["details"]["err"]
        .as_str()
        .expect("err detail")
        .contains("ruby"));
}

#[tokio::test]
async fn test_create_missing_template() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "sandbox.v1.create",
            "params": {},
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32001);
}

#[tokio::test]
async fn test_exec_requires_id_and_cmd() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "sandbox.v1.exec",
            "params": { "id": "ab12cd34", "cmd": [] },
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32001);

    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "sandbox.v1.exec",
            "params": { "id": "", "cmd": ["true"] },
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32001);
}

#[tokio::test]
async fn test_exec_unknown_sandbox() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "sandbox.v1.exec",
            "params": { "id": "deadbeef", "cmd": ["true"] },
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32005);
    assert_eq!(resp["error"]["data"]["type"], "NOT_FOUND");
    assert_eq!(resp["error"]["data"]["retryable"], false);
}

#[tokio::test]
async fn test_delete_unknown_sandbox() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "sandbox.v1.delete",
            "params": { "id": "deadbeef" },
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32007);
    assert_eq!(resp["error"]["data"]["type"], "NOT_FOUND");
    assert!(resp["error"]["data"]["details"]["err"]
        .as_str()
        .expect("err detail")
        .contains("deadbeef"));
}

#[tokio::test]
async fn test_read_file_unknown_sandbox() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "sandbox.v1.readFile",
            "params": { "id": "deadbeef", "path": "/workspace/a.txt" },
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32006);
    assert_eq!(resp["error"]["data"]["type"], "NOT_FOUND");
}

#[tokio::test]
async fn test_write_file_rejects_bad_base64() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "sandbox.v1.writeFile",
            "params": { "id": "deadbeef", "path": "/workspace/a.txt", "content": "@@not-base64@@" },
        }),
    )
    .await;

    assert_eq!(resp["error"]["code"], -32001);
}

#[tokio::test]
async fn test_request_id_round_trips() {
    let resp = rpc_json(
        app(),
        json!({
            "jsonrpc": "2.0",
            "id": "req-42",
            "method": "sandbox.v1.delete",
            "params": { "id": "deadbeef" },
        }),
    )
    .await;

    assert_eq!(resp["id"], "req-42");
    assert_eq!(resp["jsonrpc"], "2.0");
}

#[tokio::test]
async fn test_terminal_requires_upgrade() {
    // a plain GET without upgrade headers must not reach the bridge
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/terminal/deadbeef")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert!(response.status().is_client_error());
}
