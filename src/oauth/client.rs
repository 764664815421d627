/// HTTP client for the upstream OAuth token endpoint.
///
/// The upstream only accepts `application/x-www-form-urlencoded` bodies;
/// JSON token requests are rejected.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Client credentials and endpoint for the upstream token exchange.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

/// Successful token endpoint payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default, alias = "locationId")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, alias = "userType")]
    pub user_type: Option<String>,
    #[serde(default, alias = "companyId")]
    pub company_id: Option<String>,
}

impl TokenResponse {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    /// Absolute expiry for a response received at `now`. `None` when
    /// `expires_in` does not fit a timestamp.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::try_seconds(self.expires_in).and_then(|ttl| now.checked_add_signed(ttl))
    }
}

/// A failed exchange. `status` is `None` for transport failures and timeouts.
#[derive(Debug, Clone)]
pub struct TokenEndpointError {
    pub status: Option<u16>,
    pub body: String,
}

#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    credentials: OAuthCredentials,
}

impl TokenClient {
    pub fn new(credentials: OAuthCredentials, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, credentials })
    }

    pub fn credentials(&self) -> &OAuthCredentials {
        &self.credentials
    }

    /// `grant_type=refresh_token` exchange.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, TokenEndpointError> {
        self.exchange(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }

    /// `grant_type=authorization_code` exchange for a callback code.
    pub async fn authorization_code(&self, code: &str) -> Result<TokenResponse, TokenEndpointError> {
        self.exchange(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    async fn exchange(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, TokenEndpointError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);
        if let Some(uri) = self.credentials.redirect_uri.as_deref() {
            form.push(("redirect_uri", uri));
        }

        let resp = self
            .http
            .post(&self.credentials.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(timeout = e.is_timeout(), "token endpoint unreachable: {}", e);
                TokenEndpointError {
                    status: None,
                    body: e.to_string(),
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| TokenEndpointError {
            status: Some(status.as_u16()),
            body: e.to_string(),
        })?;

        if status != reqwest::StatusCode::OK {
            return Err(TokenEndpointError {
                status: Some(status.as_u16()),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| TokenEndpointError {
            status: Some(status.as_u16()),
            body: format!("malformed token response: {e}"),
        })?;
        if parsed.expires_at(Utc::now()).is_none() {
            return Err(TokenEndpointError {
                status: Some(status.as_u16()),
                body: format!(
                    "malformed token response: expires_in {} out of range",
                    parsed.expires_in
                ),
            });
        }
        Ok(parsed)
    }
}
