/// HTTP client for the upstream CRM API.
///
/// Transport-level retries are deliberately absent: the gateway retries at
/// most once, and only after a token refresh.
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};

use super::{GatewayError, OutboundRequest, ProxyBody};

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str, api_version: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `req` with `access_token` as bearer credentials.
    ///
    /// Any completed exchange is `Ok`, whatever its status; only transport
    /// failures are errors.
    pub async fn send(
        &self,
        req: &OutboundRequest,
        access_token: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, req.path))
            .map_err(|e| GatewayError::Network(format!("invalid upstream url: {e}")))?;
        if !req.query.is_empty() {
            url.query_pairs_mut().extend_pairs(req.query.iter());
        }

        let mut builder = self
            .client
            .request(req.method.clone(), url)
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        builder = match &req.body {
            ProxyBody::Empty => builder,
            ProxyBody::Json(value) => builder.json(value),
            // Bytes clones are refcounted, so a retry re-sends the same buffer
            ProxyBody::Raw {
                content_type,
                bytes,
            } => builder.header(CONTENT_TYPE, content_type).body(bytes.clone()),
        };

        builder.send().await.map_err(|e| {
            tracing::warn!(path = %req.path, "upstream request failed: {}", e);
            GatewayError::from(e)
        })
    }
}
