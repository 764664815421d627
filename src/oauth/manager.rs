//! Token lifecycle manager.
//!
//! Guarantees an installation carries a usable access token before it is
//! used, refreshing against the upstream token endpoint when the token is
//! inside the padding window. Refreshes are single-flight per installation:
//! the first caller spawns the exchange and every concurrent caller for the
//! same id awaits that one result. Refresh tokens may be single-use upstream,
//! so two parallel exchanges would invalidate each other.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::client::{TokenClient, TokenResponse};
use super::RefreshError;
use crate::models::installation::{Installation, TokenStatus};
use crate::store::InstallationStore;

pub const DEFAULT_REFRESH_PADDING_SECS: i64 = 5 * 60;

type RefreshFlight = Shared<BoxFuture<'static, Result<Installation, RefreshError>>>;

#[derive(Clone)]
struct InFlight {
    future: RefreshFlight,
    forced: bool,
}

/// Clears the in-flight slot when the refresh task ends, panics included.
struct FlightGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.inflight.remove(&self.key);
    }
}

/// Condition re-checked inside the flight, after any earlier flight for the
/// same installation has landed.
#[derive(Debug, Clone)]
enum RefreshMode {
    Force,
    IfExpiringWithin(Duration),
    IfAccessToken(String),
}

/// Response body of the token introspection endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TokenAccess {
    pub access_token: String,
    pub location_id: Option<String>,
    pub expires_in: i64,
    pub token_status: TokenStatus,
}

/// Read-only token health; never contacts upstream.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub installation_id: String,
    pub token_status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    pub has_refresh_token: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub healthy: bool,
}

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn InstallationStore>,
    client: TokenClient,
    padding: Duration,
    inflight: DashMap<String, InFlight>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn InstallationStore>, client: TokenClient) -> Self {
        Self::with_padding(store, client, Duration::seconds(DEFAULT_REFRESH_PADDING_SECS))
    }

    pub fn with_padding(
        store: Arc<dyn InstallationStore>,
        client: TokenClient,
        padding: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                padding,
                inflight: DashMap::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn InstallationStore> {
        &self.inner.store
    }

    pub fn padding(&self) -> Duration {
        self.inner.padding
    }

    /// Return the installation with an access token valid beyond the padding
    /// window, refreshing first if needed.
    pub async fn ensure_fresh(&self, id: &str) -> Result<Installation, RefreshError> {
        self.ensure_fresh_within(id, self.inner.padding).await
    }

    /// `ensure_fresh` with a caller-chosen horizon.
    pub async fn ensure_fresh_within(
        &self,
        id: &str,
        horizon: Duration,
    ) -> Result<Installation, RefreshError> {
        let inst = self.inner.store.get(id).await?;
        let now = Utc::now();
        if !inst.needs_refresh_within(horizon, now) {
            return Ok(inst);
        }

        debug!(
            installation_id = %id,
            expires_in_secs = inst.time_until_expiry(now).num_seconds(),
            token_status = %inst.token_status,
            "access token inside refresh window"
        );
        self.fly(id, RefreshMode::IfExpiringWithin(horizon)).await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Joins an in-flight forced refresh for the same installation instead of
    /// starting a second one. A conditional flight already running may skip
    /// the exchange, so it is awaited first and a new one started after it.
    /// Never retries on failure.
    pub async fn refresh(&self, id: &str) -> Result<Installation, RefreshError> {
        self.fly(id, RefreshMode::Force).await
    }

    /// Refresh after upstream rejected `rejected_token`, unless another caller
    /// has already rotated it.
    pub async fn refresh_rejected(
        &self,
        id: &str,
        rejected_token: &str,
    ) -> Result<Installation, RefreshError> {
        self.fly(id, RefreshMode::IfAccessToken(rejected_token.to_string()))
            .await
    }

    /// Flag the installation after upstream answered 401 for `rejected_token`.
    /// A token rotated in the meantime is left untouched.
    pub async fn mark_needs_refresh(
        &self,
        id: &str,
        rejected_token: &str,
    ) -> Result<TokenStatus, RefreshError> {
        let updated = self
            .inner
            .store
            .update(id, &|inst: &mut Installation| {
                if inst.access_token == rejected_token {
                    inst.token_status = TokenStatus::NeedsRefresh;
                }
            })
            .await?;
        Ok(updated.token_status)
    }

    /// Complete an OAuth installation from a callback `code` and store it.
    pub async fn exchange_code(&self, code: &str) -> Result<Installation, RefreshError> {
        let resp = self
            .inner
            .client
            .authorization_code(code)
            .await
            .map_err(|e| {
                error!(status = ?e.status, "authorization code exchange rejected: {}", e.body);
                RefreshError::UpstreamRejected {
                    status: e.status,
                    body: e.body,
                }
            })?;

        let id = format!("inst_{}", uuid::Uuid::new_v4().simple());
        let mut inst = Installation::new(&id, "", None, 0);
        apply_token_response(&mut inst, &resp, Utc::now());
        inst.last_refreshed_at = None;
        self.inner.store.put(inst.clone()).await?;

        info!(
            installation_id = %id,
            location_id = ?inst.location_id,
            scopes = inst.scopes.len(),
            "installation created"
        );
        Ok(inst)
    }

    /// Token introspection: refreshes if needed, then exposes the token.
    pub async fn token_access(&self, id: &str) -> Result<TokenAccess, RefreshError> {
        let inst = self.ensure_fresh(id).await?;
        Ok(TokenAccess {
            expires_in: inst.time_until_expiry(Utc::now()).num_seconds().max(0),
            access_token: inst.access_token,
            location_id: inst.location_id,
            token_status: inst.token_status,
        })
    }

    pub async fn health(&self, id: &str) -> Result<HealthReport, RefreshError> {
        let inst = self.inner.store.get(id).await?;
        let now = Utc::now();
        let left = inst.time_until_expiry(now);
        Ok(HealthReport {
            installation_id: inst.id.clone(),
            token_status: inst.token_status,
            expires_at: inst.expires_at,
            expires_in_secs: left.num_seconds(),
            has_refresh_token: inst.refresh_token.is_some(),
            last_refreshed_at: inst.last_refreshed_at,
            needs_refresh: inst.needs_refresh_within(self.inner.padding, now),
            healthy: left > Duration::zero() && inst.token_status != TokenStatus::Failed,
        })
    }

    async fn fly(&self, id: &str, mode: RefreshMode) -> Result<Installation, RefreshError> {
        let forced = matches!(mode, RefreshMode::Force);
        loop {
            let (flight, joined) = match self.inner.inflight.entry(id.to_string()) {
                Entry::Occupied(entry) => (entry.get().clone(), true),
                Entry::Vacant(entry) => {
                    let guard = FlightGuard {
                        inner: Arc::clone(&self.inner),
                        key: id.to_string(),
                    };
                    let mode = mode.clone();
                    // spawned so a cancelled caller cannot abandon a half-done exchange
                    let handle = tokio::spawn(async move {
                        // bound whole so the slot clears when the task ends
                        let guard = guard;
                        guard.inner.refresh_now(&guard.key, mode).await
                    });
                    let future = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(RefreshError::Store(format!("refresh task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    let flight = InFlight { future, forced };
                    entry.insert(flight.clone());
                    (flight, false)
                }
            };

            if joined && forced && !flight.forced {
                debug!(installation_id = %id, "waiting for conditional refresh before forcing one");
                let _ = flight.future.await;
                continue;
            }
            if joined {
                debug!(installation_id = %id, "joining in-flight refresh");
            }
            return flight.future.await;
        }
    }
}

impl Inner {
    async fn refresh_now(&self, id: &str, mode: RefreshMode) -> Result<Installation, RefreshError> {
        let current = self.store.get(id).await?;
        match &mode {
            RefreshMode::IfExpiringWithin(horizon)
                if !current.needs_refresh_within(*horizon, Utc::now()) =>
            {
                debug!(installation_id = %id, "token already refreshed; skipping exchange");
                return Ok(current);
            }
            RefreshMode::IfAccessToken(rejected) if current.access_token != *rejected => {
                debug!(installation_id = %id, "rejected token already rotated; skipping exchange");
                return Ok(current);
            }
            _ => {}
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!(installation_id = %id, "no refresh token stored; reinstallation required");
            self.set_status(id, TokenStatus::Failed).await?;
            return Err(RefreshError::NoRefreshToken(id.to_string()));
        };

        info!(installation_id = %id, "refreshing access token");
        match self.client.refresh(&refresh_token).await {
            Ok(resp) => {
                let now = Utc::now();
                let updated = self
                    .store
                    .update(id, &|inst: &mut Installation| {
                        apply_token_response(inst, &resp, now)
                    })
                    .await?;
                info!(
                    installation_id = %id,
                    expires_at = %updated.expires_at,
                    rotated_refresh_token = resp.refresh_token.is_some(),
                    "access token refreshed"
                );
                Ok(updated)
            }
            Err(e) => {
                error!(
                    installation_id = %id,
                    status = ?e.status,
                    "token refresh rejected: {}",
                    e.body
                );
                self.set_status(id, TokenStatus::Failed).await?;
                Err(RefreshError::UpstreamRejected {
                    status: e.status,
                    body: e.body,
                })
            }
        }
    }

    async fn set_status(&self, id: &str, status: TokenStatus) -> Result<(), RefreshError> {
        self.store
            .update(id, &|inst: &mut Installation| inst.token_status = status)
            .await?;
        Ok(())
    }
}

/// Fold a successful token response into the record. Refresh tokens do not
/// always rotate, so an omitted one keeps the stored value.
pub(crate) fn apply_token_response(inst: &mut Installation, resp: &TokenResponse, now: DateTime<Utc>) {
    inst.access_token = resp.access_token.clone();
    if let Some(rt) = &resp.refresh_token {
        inst.refresh_token = Some(rt.clone());
    }
    // the client rejects responses whose expiry does not fit
    inst.expires_at = resp.expires_at(now).unwrap_or(now);
    inst.token_status = TokenStatus::Valid;
    if let Some(location) = &resp.location_id {
        inst.location_id = Some(location.clone());
    }
    let scopes = resp.scopes();
    if !scopes.is_empty() {
        inst.scopes = scopes;
    }
    if resp.user_type.is_some() {
        inst.user_type = resp.user_type.clone();
    }
    if resp.company_id.is_some() {
        inst.company_id = resp.company_id.clone();
    }
    inst.last_refreshed_at = Some(now);
}
