//! Request proxy: resolves a logical endpoint, injects credentials and
//! tenant context, and forwards the call upstream with a single
//! refresh-and-retry on token rejection.

pub mod gateway;
pub mod request;
pub mod upstream;

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::oauth::RefreshError;

pub use gateway::Gateway;
pub use request::{build_request, OutboundRequest};
pub use upstream::UpstreamClient;

/// Caller-supplied parameters: path placeholder values first, the rest go to
/// the query string.
pub type Params = BTreeMap<String, String>;

/// Outbound request body.
#[derive(Debug, Clone, Default)]
pub enum ProxyBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Forwarded byte-for-byte, e.g. a multipart upload whose content type
    /// carries the boundary.
    Raw { content_type: String, bytes: Bytes },
}

/// A 2xx upstream response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("installation {0} not found")]
    InstallationNotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(#[source] RefreshError),

    #[error("missing value for path parameter '{0}'")]
    MissingParam(String),

    #[error("endpoint '{0}' requires a location id but none is stored or supplied")]
    MissingLocation(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("upstream returned status {status}")]
    UpstreamError {
        status: u16,
        body: Bytes,
        content_type: Option<String>,
    },

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream network error: {0}")]
    Network(String),
}

impl From<RefreshError> for GatewayError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NotFound(id) => GatewayError::InstallationNotFound(id),
            other => GatewayError::AuthFailed(other),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}
