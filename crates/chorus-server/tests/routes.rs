//! Integration tests for the HTTP routes and session WebSocket wiring.

use std::collections::HashMap;
use std::path::Path;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use tower::ServiceExt;

use chorus_core::PlatformConfig;
use chorus_server::{AppState, build_context, build_router, serve};

const WORKER: &str = r#"
    registerAgent({
        instructions: "You are a demo agent.",
        voice: "luna",
        tools: [],
    });
"#;

fn test_config(root: &Path) -> PlatformConfig {
    PlatformConfig {
        assemblyai_api_key: "stt-key".to_string(),
        assemblyai_tts_api_key: "tts-key".to_string(),
        tts_wss_url: None,
        llm_model: "test-model".to_string(),
        llm_api_key: None,
        llm_base_url: "http://127.0.0.1:9/v1".to_string(),
        port: 0,
        bundle_dir: root.join("bundles"),
        db_path: root.join("chorus.db"),
    }
}

async fn test_state(root: &Path) -> AppState {
    build_context(test_config(root), None).await.unwrap()
}

fn deploy_body(slug: &str) -> String {
    serde_json::json!({
        "slug": slug,
        "env": {
            "ASSEMBLYAI_API_KEY": "stt-key",
            "ASSEMBLYAI_TTS_API_KEY": "tts-key",
        },
        "worker": WORKER,
        "client": "console.log('client');",
    })
    .to_string()
}

fn post_deploy(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/deploy")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn deploy_then_fetch_client_and_shell() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app
        .clone()
        .oneshot(post_deploy(deploy_body("demo")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["ok"], true);

    let client = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/demo/client.js")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(client.status(), StatusCode::OK);
    assert_eq!(
        client.headers()[header::CONTENT_TYPE],
        "application/javascript; charset=utf-8"
    );
    assert!(body_string(client).await.contains("console.log"));

    let shell = app
        .oneshot(
            Request::builder()
                .uri("/demo/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(shell.status(), StatusCode::OK);
    assert!(body_string(shell).await.contains("/demo/client.js"));
}

#[tokio::test]
async fn deploys_listing_reflects_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    for slug in ["beta", "alpha"] {
        app.clone()
            .oneshot(post_deploy(deploy_body(slug)))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/deploys")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["slugs"], serde_json::json!(["alpha", "beta"]));
}

#[tokio::test]
async fn deploy_missing_required_secret_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let body = serde_json::json!({
        "slug": "demo",
        "env": {"ASSEMBLYAI_API_KEY": "stt-key"},
        "worker": WORKER,
        "client": "",
    })
    .to_string();
    let response = app.oneshot(post_deploy(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("ASSEMBLYAI_TTS_API_KEY"));
}

#[tokio::test]
async fn unknown_slug_assets_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(dir.path()).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ghost/client.js")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_websocket_sends_ready_first() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    build_router(state.clone())
        .oneshot(post_deploy(deploy_body("demo")))
        .await
        .unwrap();

    let server = serve(state).await.unwrap();
    let url = format!("ws://{}/demo/session", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let first = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for the first frame")
        .unwrap()
        .unwrap();
    let text = match first {
        tokio_tungstenite::tungstenite::Message::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    };
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "ready");
    assert_eq!(frame["sampleRate"], 16_000);
    assert_eq!(frame["ttsSampleRate"], 24_000);

    server.task.abort();
}

#[tokio::test]
async fn unknown_slug_session_closes_with_4404() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(test_state(dir.path()).await).await.unwrap();
    let url = format!("ws://{}/ghost/session", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let close = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close")
        .unwrap()
        .unwrap();
    match close {
        tokio_tungstenite::tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4404);
        }
        other => panic!("expected a close frame, got {other:?}"),
    }

    server.task.abort();
}

#[tokio::test]
async fn default_session_without_agent_closes_with_4404() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(test_state(dir.path()).await).await.unwrap();
    let url = format!("ws://{}/session", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let close = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close")
        .unwrap()
        .unwrap();
    assert!(matches!(
        close,
        tokio_tungstenite::tungstenite::Message::Close(Some(frame))
            if u16::from(frame.code) == 4404
    ));

    server.task.abort();
}

#[tokio::test]
async fn default_agent_mode_serves_the_bare_session_route() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_context(test_config(dir.path()), Some(WORKER.to_string()))
        .await
        .unwrap();
    assert!(state.default_agent.is_some());
    assert_eq!(
        state.default_agent.as_ref().unwrap().definition.slug,
        "default"
    );
    assert_eq!(
        state.default_agent.as_ref().unwrap().env,
        HashMap::from([
            ("ASSEMBLYAI_API_KEY".to_string(), "stt-key".to_string()),
            ("ASSEMBLYAI_TTS_API_KEY".to_string(), "tts-key".to_string()),
        ])
    );
}
