use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{any, get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;

/// Multipart media uploads are forwarded whole.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Build the full HTTP surface.
///
/// `/healthz` and the OAuth callback are open; everything else sits behind
/// the admin key when one is configured.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/token-access/:installation_id", get(handlers::token_access))
        .route("/api/token-health/:installation_id", get(handlers::token_health))
        .route("/api/refresh-token/:installation_id", post(handlers::refresh_token))
        .route("/installations", get(handlers::list_installations))
        .route("/endpoints", get(handlers::list_endpoints))
        .route("/proxy/:logical_name", any(handlers::proxy))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/oauth/callback", get(handlers::oauth_callback))
        .route("/api/oauth/callback", get(handlers::oauth_callback))
        .merge(protected)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key. No key configured means the API is open.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            // never log the full key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!(path = %req.uri().path(), "invalid admin key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "missing admin key");
            Err(AppError::Unauthorized)
        }
    }
}

/// Middleware: tags every response with a fresh `x-request-id`.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
