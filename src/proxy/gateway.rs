use std::sync::Arc;

use tracing::{debug, info, warn};

use super::request::{build_request, OutboundRequest};
use super::upstream::UpstreamClient;
use super::{GatewayError, Params, ProxyBody, ProxyResponse};
use crate::models::endpoint::EndpointDescriptor;
use crate::models::installation::Installation;
use crate::oauth::TokenManager;
use crate::registry::EndpointRegistry;

/// Lowercase body fragments the upstream uses for rejected tokens on
/// non-401 statuses.
pub const DEFAULT_INVALID_TOKEN_SIGNATURES: &[&str] =
    &["invalid jwt", "invalid_token", "token expired", "jwt expired"];

/// Single entry point for authenticated upstream calls.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<EndpointRegistry>,
    tokens: TokenManager,
    upstream: UpstreamClient,
    signatures: Vec<String>,
}

struct Attempt {
    status: u16,
    headers: reqwest::header::HeaderMap,
    body: bytes::Bytes,
}

impl Gateway {
    pub fn new(registry: Arc<EndpointRegistry>, tokens: TokenManager, upstream: UpstreamClient) -> Self {
        Self {
            registry,
            tokens,
            upstream,
            signatures: DEFAULT_INVALID_TOKEN_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the invalid-token body signatures. Matching is case-insensitive.
    pub fn with_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.signatures = signatures
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Call `logical_name` on behalf of `installation_id`.
    ///
    /// A rejected token triggers exactly one refresh and one retry of the
    /// identical request; whatever the retry returns is final.
    #[tracing::instrument(skip(self, params, body), fields(endpoint = %logical_name))]
    pub async fn invoke(
        &self,
        installation_id: &str,
        logical_name: &str,
        params: Params,
        body: ProxyBody,
    ) -> Result<ProxyResponse, GatewayError> {
        let descriptor = self
            .registry
            .resolve(logical_name)
            .ok_or_else(|| GatewayError::UnknownEndpoint(logical_name.to_string()))?;

        let inst = self.tokens.ensure_fresh(installation_id).await?;
        check_scope(descriptor, &inst);

        let request = build_request(descriptor, &params, body, inst.location_id.as_deref())?;

        let first = self.attempt(&request, &inst.access_token).await?;
        let outcome = if self.is_token_rejection(&first) {
            info!(
                installation_id = %installation_id,
                status = first.status,
                "upstream rejected access token; refreshing and retrying once"
            );
            self.tokens
                .mark_needs_refresh(installation_id, &inst.access_token)
                .await?;
            let refreshed = self
                .tokens
                .refresh_rejected(installation_id, &inst.access_token)
                .await?;
            self.attempt(&request, &refreshed.access_token).await?
        } else {
            first
        };

        if (200..300).contains(&outcome.status) {
            debug!(status = outcome.status, bytes = outcome.body.len(), "upstream call succeeded");
            Ok(ProxyResponse {
                status: outcome.status,
                headers: outcome.headers,
                body: outcome.body,
            })
        } else {
            warn!(
                installation_id = %installation_id,
                status = outcome.status,
                "upstream call failed"
            );
            let content_type = outcome
                .headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Err(GatewayError::UpstreamError {
                status: outcome.status,
                body: outcome.body,
                content_type,
            })
        }
    }

    async fn attempt(&self, request: &OutboundRequest, token: &str) -> Result<Attempt, GatewayError> {
        let resp = self.upstream.send(request, token).await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(Attempt { status, headers, body })
    }

    fn is_token_rejection(&self, attempt: &Attempt) -> bool {
        if attempt.status == 401 {
            return true;
        }
        if (200..300).contains(&attempt.status) || self.signatures.is_empty() {
            return false;
        }
        let text = String::from_utf8_lossy(&attempt.body).to_lowercase();
        self.signatures.iter().any(|sig| text.contains(sig.as_str()))
    }
}

/// Warn-only: the upstream is the authority on scopes.
fn check_scope(descriptor: &EndpointDescriptor, inst: &Installation) {
    let Some(required) = descriptor.required_scope.as_deref() else {
        return;
    };
    if inst.scopes.is_empty() || scope_granted(&inst.scopes, required) {
        return;
    }
    warn!(
        installation_id = %inst.id,
        endpoint = %descriptor.name,
        required_scope = %required,
        "installation lacks the scope this endpoint expects"
    );
}

/// `x.write` also grants `x.readonly`.
fn scope_granted(scopes: &[String], required: &str) -> bool {
    scopes.iter().any(|s| {
        s == required
            || required
                .strip_suffix(".readonly")
                .is_some_and(|base| s.strip_suffix(".write") == Some(base))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::client::{OAuthCredentials, TokenClient};
    use crate::store::{InstallationStore, MemoryStore};
    use crate::models::installation::TokenStatus;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, store: MemoryStore) -> Gateway {
        let client = TokenClient::new(
            OAuthCredentials {
                token_url: format!("{}/oauth/token", server.uri()),
                client_id: "cid".into(),
                client_secret: "secret".into(),
                redirect_uri: None,
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let tokens = TokenManager::new(Arc::new(store), client);
        let upstream = UpstreamClient::new(&server.uri(), "2021-07-28", Duration::from_secs(5)).unwrap();
        Gateway::new(Arc::new(EndpointRegistry::builtin()), tokens, upstream)
    }

    fn fresh(id: &str) -> Installation {
        Installation::new(id, "at-old", Some("rt".into()), 3600).with_location("loc_1")
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn mount_token_endpoint(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "expires_in": 86399,
            })))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_double_401_is_returned_not_looped() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/products/p1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .expect(2)
            .mount(&server)
            .await;

        let store = MemoryStore::from_records([fresh("a")]);
        let gw = gateway(&server, store.clone());
        let err = gw
            .invoke("a", "getProduct", params(&[("productId", "p1")]), ProxyBody::Empty)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::UpstreamError { status: 401, .. }));
        let stored = store.get("a").await.unwrap();
        assert_eq!(stored.access_token, "at-new");
        assert_eq!(stored.token_status, TokenStatus::Valid);
    }

    #[tokio::test]
    async fn test_401_then_success_uses_refreshed_token() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer at-old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer at-new"))
            .and(header("version", "2021-07-28"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "p1"})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, MemoryStore::from_records([fresh("a")]));
        let resp = gw
            .invoke("a", "getProduct", params(&[("productId", "p1")]), ProxyBody::Empty)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["id"], "p1");
    }

    #[tokio::test]
    async fn test_invalid_jwt_body_triggers_retry() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer at-old"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"message": "Invalid JWT"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer at-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"products": []})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, MemoryStore::from_records([fresh("a")]));
        let resp = gw
            .invoke("a", "listProducts", Params::new(), ProxyBody::Empty)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_plain_upstream_error_is_not_retried() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 0).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(serde_json::json!({"message": "bad filter"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, MemoryStore::from_records([fresh("a")]));
        let err = gw
            .invoke("a", "listProducts", Params::new(), ProxyBody::Empty)
            .await
            .unwrap_err();
        match err {
            GatewayError::UpstreamError { status, body, content_type } => {
                assert_eq!(status, 422);
                assert!(String::from_utf8_lossy(&body).contains("bad filter"));
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_endpoint_and_missing_installation() {
        let server = MockServer::start().await;
        let gw = gateway(&server, MemoryStore::from_records([fresh("a")]));

        let err = gw
            .invoke("a", "launchRockets", Params::new(), ProxyBody::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownEndpoint(name) if name == "launchRockets"));

        let err = gw
            .invoke("ghost", "listProducts", Params::new(), ProxyBody::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InstallationNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let stale = Installation::new("a", "at-old", Some("rt-bad".into()), 1).with_location("loc_1");
        let gw = gateway(&server, MemoryStore::from_records([stale]));
        let err = gw
            .invoke("a", "listProducts", Params::new(), ProxyBody::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailed(_)));
    }

    #[test]
    fn test_write_scope_grants_readonly() {
        let scopes = vec!["products.write".to_string()];
        assert!(scope_granted(&scopes, "products.readonly"));
        assert!(scope_granted(&scopes, "products.write"));
        assert!(!scope_granted(&scopes, "contacts.readonly"));
        assert!(!scope_granted(&["products.readonly".to_string()], "products.write"));
    }
}
