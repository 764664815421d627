//! HTTP surface: routing, admin auth, error envelopes, and proxy
//! passthrough, driven through the axum router without binding a port.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokengate::models::installation::Installation;
use tokengate::oauth::{OAuthCredentials, TokenClient, TokenManager};
use tokengate::proxy::{Gateway, UpstreamClient};
use tokengate::registry::EndpointRegistry;
use tokengate::store::{InstallationStore, MemoryStore};
use tokengate::{api, AppState};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADMIN_KEY: &str = "test-admin-key-0123456789";

fn app(server: &MockServer, store: MemoryStore, admin_key: Option<&str>) -> Router {
    let client = TokenClient::new(
        OAuthCredentials {
            token_url: format!("{}/oauth/token", server.uri()),
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            redirect_uri: Some("https://example.test/oauth/callback".into()),
        },
        Duration::from_secs(5),
    )
    .unwrap();
    let tokens = TokenManager::new(Arc::new(store), client);
    let upstream = UpstreamClient::new(&server.uri(), "2021-07-28", Duration::from_secs(5)).unwrap();
    let gateway = Gateway::new(Arc::new(EndpointRegistry::builtin()), tokens, upstream);
    api::router(Arc::new(AppState::new(gateway, admin_key.map(String::from))))
}

fn seeded() -> MemoryStore {
    MemoryStore::from_records([Installation::new("inst_1", "at-1", Some("rt-1".into()), 3600)
        .with_location("loc_1")
        .with_scopes(["products.readonly"])])
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Health & auth ────────────────────────────────────────────

#[tokio::test]
async fn test_healthz_is_open_and_tagged() {
    let server = MockServer::start().await;
    let resp = app(&server, seeded(), Some(ADMIN_KEY))
        .oneshot(get("/healthz"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_admin_key_guards_api() {
    let server = MockServer::start().await;
    let app = app(&server, seeded(), Some(ADMIN_KEY));

    let resp = app.clone().oneshot(get("/installations")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["error"]["code"], "invalid_admin_key");

    let wrong = Request::builder()
        .uri("/installations")
        .header("x-admin-key", "nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let bearer = Request::builder()
        .uri("/installations")
        .header("authorization", format!("Bearer {ADMIN_KEY}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(bearer).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body[0]["id"], "inst_1");
    assert_eq!(body[0]["location_id"], "loc_1");
    assert!(body[0].get("access_token").is_none());
    assert!(body[0].get("refresh_token").is_none());
}

// ── Token lifecycle routes ───────────────────────────────────

#[tokio::test]
async fn test_token_access_and_health() {
    let server = MockServer::start().await;
    let app = app(&server, seeded(), None);

    let resp = app.clone().oneshot(get("/token-access/inst_1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["access_token"], "at-1");
    assert_eq!(body["location_id"], "loc_1");
    assert_eq!(body["token_status"], "valid");
    assert!(body["expires_in"].as_i64().unwrap() > 3500);

    let resp = app.clone().oneshot(get("/api/token-health/inst_1")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["healthy"], true);
    assert_eq!(body["needs_refresh"], false);
    assert_eq!(body["has_refresh_token"], true);

    let resp = app.oneshot(get("/token-access/ghost")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"]["code"], "installation_not_found");
}

#[tokio::test]
async fn test_manual_refresh_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 86399,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded();
    let req = Request::builder()
        .method("POST")
        .uri("/api/refresh-token/inst_1")
        .body(Body::empty())
        .unwrap();
    let resp = app(&server, store.clone(), None).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["token_status"], "valid");

    let stored = store.get("inst_1").await.unwrap();
    assert_eq!(stored.access_token, "at-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-2"));
}

#[tokio::test]
async fn test_oauth_callback_creates_installation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "refresh_token": "rt-new",
            "expires_in": 86399,
            "locationId": "loc_new",
            "scope": "products.write medias.write",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let app = app(&server, store.clone(), Some(ADMIN_KEY));

    let resp = app.clone().oneshot(get("/oauth/callback?code=auth-code-1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await;
    let id = body["installation_id"].as_str().unwrap().to_string();
    assert!(id.starts_with("inst_"));
    assert_eq!(body["location_id"], "loc_new");

    let stored = store.get(&id).await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
    assert!(stored.has_scope("medias.write"));

    let resp = app.oneshot(get("/oauth/callback")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Proxy route ──────────────────────────────────────────────

#[tokio::test]
async fn test_proxy_route_forwards_and_injects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/prod_1"))
        .and(header("authorization", "Bearer at-1"))
        .and(query_param("locationId", "loc_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "prod_1"})))
        .expect(1)
        .mount(&server)
        .await;

    let resp = app(&server, seeded(), None)
        .oneshot(get("/proxy/getProduct?installation_id=inst_1&productId=prod_1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["_id"], "prod_1");
}

#[tokio::test]
async fn test_proxy_route_passes_upstream_errors_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "Product not found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = app(&server, seeded(), None);
    let resp = app
        .clone()
        .oneshot(get("/proxy/getProduct?installation_id=inst_1&productId=missing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["message"], "Product not found");

    let resp = app.clone().oneshot(get("/proxy/getProduct?productId=x")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(get("/proxy/launchRockets?installation_id=inst_1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"]["code"], "unknown_endpoint");
}

#[tokio::test]
async fn test_proxy_route_json_body_gets_location() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/products/"))
        .and(body_string_contains("\"locationId\":\"loc_1\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "prod_2"})))
        .expect(1)
        .mount(&server)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/proxy/createProduct?installation_id=inst_1")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"Widget"}"#))
        .unwrap();
    let resp = app(&server, seeded(), None).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}
