//! HTTP surface end to end: SSE framing, validation errors, config inputs.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use amahi_agent::api;
use amahi_agent::config::{Catalog, EnvConfig};
use amahi_agent::infra::command::{ExecMode, SimulationConfig};
use amahi_agent::state::{AppState, Store};

async fn simulated_app(dir: &std::path::Path, sim: SimulationConfig) -> (Router, Arc<AppState>) {
    let config = EnvConfig::for_data_dir(dir, ExecMode::Simulate(sim));
    let catalog = Catalog::builtin();
    let store = Store::in_memory();
    store.merge_catalog(&catalog).await.unwrap();
    let state = Arc::new(AppState::new(config, catalog, store));
    (api::router(state.clone()), state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: Method, uri: &str, json: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn install_stream_has_sse_headers_and_ends_with_done() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app.oneshot(get("/apps/wiki/install/stream")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert!(headers.contains_key(header::LAST_MODIFIED));

    let body = body_text(response).await;
    assert!(body.contains("data: Pulling image wiki-engine:latest\n"));
    assert!(body.ends_with("event: done\ndata: success\n\n"), "{}", body);
    assert_eq!(body.matches("event: done").count(), 1);

    let wiki = state.store.app("wiki").await.unwrap();
    assert_eq!(wiki.host_port, Some(8088));
    assert_eq!(wiki.container_name.as_deref(), Some("amahi-wiki"));
}

#[tokio::test]
async fn failing_install_streams_error_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) =
        simulated_app(dir.path(), SimulationConfig::instant().failing("docker pull")).await;

    let body = body_text(app.oneshot(get("/apps/wiki/install/stream")).await.unwrap()).await;

    assert!(body.contains("✗ FAILED"));
    assert!(body.ends_with("event: done\ndata: error\n\n"), "{}", body);

    let wiki = state.store.app("wiki").await.unwrap();
    assert!(wiki.error_message.is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn unknown_app_is_404_json() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app.oneshot(get("/apps/nope/install/stream")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn bad_identifier_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app.oneshot(get("/apps/Bad%20Id/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn starting_an_available_app_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/apps/wiki/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn control_actions_after_install() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let body = body_text(app.clone().oneshot(get("/apps/wiki/install/stream")).await.unwrap()).await;
    assert!(body.ends_with("data: success\n\n"));

    let stop = Request::builder()
        .method(Method::POST)
        .uri("/apps/wiki/stop")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(stop).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "stopped");
    assert_eq!(json["host_port"], 8088);

    let status = app.oneshot(get("/apps/wiki/status")).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&body_text(status).await).unwrap();
    assert_eq!(json["status"], "stopped");
}

#[tokio::test]
async fn share_changes_feed_samba_config() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/shares",
            serde_json::json!({ "name": "Books", "path": "/var/hda/files/books" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let duplicate = app
        .clone()
        .oneshot(send_json(
            Method::POST,
            "/shares",
            serde_json::json!({ "name": "books", "path": "/srv/books" }),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let config = body_text(app.oneshot(get("/samba/config")).await.unwrap()).await;
    assert!(config.contains("[Books]"));
    assert!(config.contains("/var/hda/files/books"));
}

#[tokio::test]
async fn share_fields_cannot_inject_sections() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let bodies = [
        serde_json::json!({ "name": "Books", "path": "/x\n[evil]\npath = /" }),
        serde_json::json!({
            "name": "Books",
            "path": "/var/hda/files/books",
            "everyone": false,
            "users": ["alice]\n[evil"],
        }),
        serde_json::json!({
            "name": "Books",
            "path": "/var/hda/files/books",
            "everyone": false,
            "users": ["alice"],
            "write_users": ["bob\n[evil]"],
        }),
    ];
    for body in bodies {
        let response = app
            .clone()
            .oneshot(send_json(Method::POST, "/shares", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let config = body_text(app.oneshot(get("/samba/config")).await.unwrap()).await;
    assert!(!config.contains("[evil"));
}

#[tokio::test]
async fn health_reports_mode_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = simulated_app(dir.path(), SimulationConfig::instant()).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["mode"], "simulate");
    assert_eq!(json["counts"]["apps"], 3);
    assert_eq!(json["in_flight"], serde_json::json!([]));
    assert_eq!(json["store_path"], serde_json::Value::Null);
}
