use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::oauth::RefreshError;
use crate::proxy::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing admin key")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn envelope(status: StatusCode, error_type: &str, code: &str, msg: String) -> Response {
    let body = Json(json!({
        "error": {
            "message": msg,
            "type": error_type,
            "code": code,
        }
    }));
    (status, body).into_response()
}

fn internal(e: &dyn std::fmt::Display) -> Response {
    tracing::error!("Internal error: {}", e);
    envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
    )
}

fn refresh_response(e: &RefreshError) -> Response {
    match e {
        RefreshError::NotFound(_) => envelope(
            StatusCode::NOT_FOUND,
            "not_found_error",
            "installation_not_found",
            e.to_string(),
        ),
        RefreshError::NoRefreshToken(_) => envelope(
            StatusCode::CONFLICT,
            "authentication_error",
            "reinstall_required",
            e.to_string(),
        ),
        RefreshError::UpstreamRejected { .. } => envelope(
            StatusCode::BAD_GATEWAY,
            "authentication_error",
            "token_refresh_failed",
            e.to_string(),
        ),
        RefreshError::Store(_) => internal(e),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => envelope(
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_admin_key",
                "invalid or missing admin key".to_string(),
            ),
            AppError::BadRequest(msg) => envelope(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg,
            ),
            AppError::Refresh(e) => refresh_response(&e),
            AppError::Store(StoreError::NotFound(id)) => envelope(
                StatusCode::NOT_FOUND,
                "not_found_error",
                "installation_not_found",
                format!("installation {id} not found"),
            ),
            AppError::Store(e) => internal(&e),
            AppError::Internal(e) => internal(&e),
            AppError::Gateway(e) => match e {
                // upstream answers pass through untouched
                GatewayError::UpstreamError {
                    status,
                    body,
                    content_type,
                } => {
                    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                    }
                    response
                }
                GatewayError::UnknownEndpoint(_) => envelope(
                    StatusCode::NOT_FOUND,
                    "not_found_error",
                    "unknown_endpoint",
                    e.to_string(),
                ),
                GatewayError::InstallationNotFound(_) => envelope(
                    StatusCode::NOT_FOUND,
                    "not_found_error",
                    "installation_not_found",
                    e.to_string(),
                ),
                GatewayError::AuthFailed(ref inner) => {
                    tracing::warn!("proxy authentication failed: {}", inner);
                    envelope(
                        StatusCode::UNAUTHORIZED,
                        "authentication_error",
                        if inner.requires_reinstall() {
                            "reinstall_required"
                        } else {
                            "auth_failed"
                        },
                        e.to_string(),
                    )
                }
                GatewayError::MissingParam(_) => envelope(
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "missing_param",
                    e.to_string(),
                ),
                GatewayError::MissingLocation(_) => envelope(
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "missing_location",
                    e.to_string(),
                ),
                GatewayError::InvalidBody(_) => envelope(
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "invalid_body",
                    e.to_string(),
                ),
                GatewayError::Timeout => envelope(
                    StatusCode::GATEWAY_TIMEOUT,
                    "upstream_error",
                    "upstream_timeout",
                    e.to_string(),
                ),
                GatewayError::Network(_) => envelope(
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "upstream_failed",
                    e.to_string(),
                ),
            },
        }
    }
}
