//! Admin API tests over the in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway::{AppState, build_router};
use kvstore::{KvStore, MemoryStore};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADMIN_TOKEN: &str = "adm-secret";

fn test_app(store: Arc<MemoryStore>) -> Router {
    build_router(
        AppState {
            store,
            client: reqwest::Client::new(),
            admin_token: Some(Arc::new(common::Secret::new(ADMIN_TOKEN.to_string()))),
            debug: false,
            default_cooldown_secs: 300,
            primary_url: "http://127.0.0.1:1".to_string(),
        },
        None,
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("{uri}?token={ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn admin_requires_token() {
    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/config")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/config?token=wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_closed_when_no_token_configured() {
    let app = build_router(
        AppState {
            store: Arc::new(MemoryStore::new()),
            client: reqwest::Client::new(),
            admin_token: None,
            debug: false,
            default_cooldown_secs: 300,
            primary_url: "http://127.0.0.1:1".to_string(),
        },
        None,
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/config?token=anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provider_config_roundtrip_masks_keys() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app(store.clone());

    let response = app
        .clone()
        .oneshot(post(
            "/admin/config",
            json!([{
                "name": "openrouter",
                "baseUrl": "https://openrouter.ai/api/v1/messages",
                "apiKey": "sk-or-real",
                "retry": 2,
            }]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/admin/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed[0]["name"], "openrouter");
    assert_eq!(listed[0]["apiKey"], "***");
    assert_eq!(listed[0]["retry"], 2);

    // Posting the masked list back must not wipe the stored key
    let response = app
        .clone()
        .oneshot(post("/admin/config", listed))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let persisted = store.get("providers").await.unwrap().unwrap();
    assert!(persisted.contains("sk-or-real"), "{persisted}");
}

#[tokio::test]
async fn invalid_provider_entries_are_rejected() {
    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app
        .clone()
        .oneshot(post(
            "/admin/config",
            json!([{"name": "incomplete", "baseUrl": "https://x"}]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post("/admin/config", json!({"not": "an array"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tokens_roundtrip_and_note_validation() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app(store.clone());

    let response = app
        .clone()
        .oneshot(post(
            "/admin/tokens",
            json!(["bare-token", {"token": "noted", "note": "ci runner 1"}]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/admin/tokens")).await.unwrap();
    let tokens = body_json(response).await;
    assert_eq!(tokens[0]["token"], "bare-token");
    assert_eq!(tokens[1]["note"], "ci runner 1");

    let response = app
        .oneshot(post(
            "/admin/tokens",
            json!([{"token": "x", "note": "bad;note"}]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn settings_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app(store.clone());

    let response = app.clone().oneshot(get("/admin/settings")).await.unwrap();
    assert_eq!(body_json(response).await["cooldownDuration"], 300);

    let response = app
        .clone()
        .oneshot(post("/admin/settings", json!({"cooldownDuration": 120})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        store.get("cooldown_duration").await.unwrap().as_deref(),
        Some("120")
    );

    let response = app.oneshot(get("/admin/settings")).await.unwrap();
    assert_eq!(body_json(response).await["cooldownDuration"], 120);
}

#[tokio::test]
async fn anthropic_status_roundtrip() {
    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app
        .clone()
        .oneshot(get("/admin/anthropic-status"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["disabled"], false);

    let response = app
        .clone()
        .oneshot(post("/admin/anthropic-status", json!({"disabled": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/admin/anthropic-status")).await.unwrap();
    assert_eq!(body_json(response).await["disabled"], true);
}

#[tokio::test]
async fn provider_states_list_and_reset() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            "provider-state:openrouter",
            json!({
                "consecutiveFailures": 4,
                "lastFailure": 1_700_000_000_000u64,
                "lastSuccess": null,
                "cooldownUntil": 1_700_000_030_000u64,
            })
            .to_string(),
            None,
        )
        .await
        .unwrap();
    let app = test_app(store.clone());

    let response = app
        .clone()
        .oneshot(get("/admin/provider-states"))
        .await
        .unwrap();
    let states = body_json(response).await;
    assert_eq!(states[0]["name"], "openrouter");
    assert_eq!(states[0]["consecutiveFailures"], 4);

    let response = app
        .clone()
        .oneshot(post(
            "/admin/provider-states/openrouter/reset",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get("provider-state:openrouter").await.unwrap(), None);
}

#[tokio::test]
async fn rectifier_roundtrip() {
    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app.clone().oneshot(get("/admin/rectifier")).await.unwrap();
    let defaults = body_json(response).await;
    assert_eq!(defaults["enabled"], true);
    assert_eq!(defaults["requestThinkingBudget"], true);

    let response = app
        .clone()
        .oneshot(post(
            "/admin/rectifier",
            json!({"enabled": true, "requestThinkingBudget": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/admin/rectifier")).await.unwrap();
    let updated = body_json(response).await;
    assert_eq!(updated["requestThinkingBudget"], false);
    assert_eq!(updated["requestThinkingSignature"], true);
}

#[tokio::test]
async fn test_provider_probes_all_models() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_probe"})))
        .expect(4)
        .mount(&upstream)
        .await;

    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(post(
            "/admin/test-provider",
            json!({
                "name": "candidate",
                "baseUrl": format!("{}/v1/messages", upstream.uri()),
                "apiKey": "sk-test",
                "modelMapping": {"claude-3-5-haiku-20241022": "candidate/haiku"},
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["provider"], "candidate");
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r["ok"] == true));
    let haiku = results
        .iter()
        .find(|r| r["model"] == "claude-3-5-haiku-20241022")
        .unwrap();
    assert_eq!(haiku["mappedModel"], "candidate/haiku");
}

#[tokio::test]
async fn test_provider_reports_upstream_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "bad key"},
        })))
        .mount(&upstream)
        .await;

    let app = test_app(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(post(
            "/admin/test-provider",
            json!({
                "name": "candidate",
                "baseUrl": format!("{}/v1/messages", upstream.uri()),
                "apiKey": "sk-wrong",
            }),
        ))
        .await
        .unwrap();

    let report = body_json(response).await;
    let results = report["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["ok"] == false));
    assert!(results.iter().all(|r| r["status"] == 401));
}
