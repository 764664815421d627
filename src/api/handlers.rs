use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::endpoint::EndpointDescriptor;
use crate::models::installation::InstallationSummary;
use crate::oauth::{HealthReport, TokenAccess};
use crate::proxy::{Params, ProxyBody};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub installation_id: String,
    pub location_id: Option<String>,
    pub scopes: Vec<String>,
    pub message: String,
}

// ── Token lifecycle ──────────────────────────────────────────

pub async fn token_access(
    State(state): State<Arc<AppState>>,
    Path(installation_id): Path<String>,
) -> Result<Json<TokenAccess>, AppError> {
    let access = state.gateway.tokens().token_access(&installation_id).await?;
    Ok(Json(access))
}

pub async fn token_health(
    State(state): State<Arc<AppState>>,
    Path(installation_id): Path<String>,
) -> Result<Json<HealthReport>, AppError> {
    let report = state.gateway.tokens().health(&installation_id).await?;
    Ok(Json(report))
}

/// Force a refresh and answer with the post-refresh health report.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Path(installation_id): Path<String>,
) -> Result<Json<HealthReport>, AppError> {
    let tokens = state.gateway.tokens();
    tokens.refresh(&installation_id).await?;
    let report = tokens.health(&installation_id).await?;
    Ok(Json(report))
}

pub async fn list_installations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InstallationSummary>>, AppError> {
    let mut installations = state.gateway.tokens().store().list().await?;
    installations.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(installations.iter().map(InstallationSummary::from).collect()))
}

pub async fn list_endpoints(State(state): State<Arc<AppState>>) -> Json<Vec<EndpointDescriptor>> {
    Json(
        state
            .gateway
            .registry()
            .descriptors()
            .into_iter()
            .cloned()
            .collect(),
    )
}

/// OAuth redirect target: trades the authorization code for a new
/// installation.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = params.error {
        return Err(AppError::BadRequest(format!("authorization denied: {error}")));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'code' query parameter".into()))?;

    let inst = state.gateway.tokens().exchange_code(&code).await?;
    Ok((
        StatusCode::CREATED,
        Json(CallbackResponse {
            installation_id: inst.id,
            location_id: inst.location_id,
            scopes: inst.scopes,
            message: "installation created".into(),
        }),
    ))
}

// ── Proxy ────────────────────────────────────────────────────

/// `ANY /proxy/:logical_name?installation_id=...`
///
/// The registry decides the upstream method; the inbound method is ignored.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path(logical_name): Path<String>,
    Query(mut query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let installation_id = query
        .remove("installation_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'installation_id' query parameter".into()))?;
    let params: Params = query;
    let body = inbound_body(&headers, body)?;

    let resp = state
        .gateway
        .invoke(&installation_id, &logical_name, params, body)
        .await?;

    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    if let Some(ct) = resp.headers.get(header::CONTENT_TYPE) {
        if let Ok(value) = HeaderValue::from_bytes(ct.as_bytes()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

/// JSON bodies are parsed so the location can be injected; anything else is
/// forwarded untouched with its content type.
fn inbound_body(headers: &HeaderMap, body: Bytes) -> Result<ProxyBody, AppError> {
    if body.is_empty() {
        return Ok(ProxyBody::Empty);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let is_json = content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json") || mime.trim().ends_with("+json"))
        .unwrap_or(false);

    if is_json {
        let value = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;
        Ok(ProxyBody::Json(value))
    } else {
        Ok(ProxyBody::Raw {
            content_type: content_type.to_string(),
            bytes: body,
        })
    }
}
