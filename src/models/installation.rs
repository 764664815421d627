use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ── Installation ─────────────────────────────────────────────

/// A persisted OAuth grant for one tenant.
///
/// Created once when the upstream OAuth handshake completes and afterwards
/// mutated only by the token manager (token fields and status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Always `now + expires_in` of the most recent token response.
    pub expires_at: DateTime<Utc>,
    /// Tenant context the upstream API scopes calls to.
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_status: TokenStatus,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    #[default]
    Valid,
    NeedsRefresh,
    Failed,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "valid",
            TokenStatus::NeedsRefresh => "needs_refresh",
            TokenStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Installation {
    /// Build a freshly-installed record from a token grant.
    pub fn new(
        id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_at: now + Duration::seconds(expires_in_secs),
            location_id: None,
            scopes: Vec::new(),
            token_status: TokenStatus::Valid,
            user_type: None,
            company_id: None,
            created_at: now,
            last_refreshed_at: None,
        }
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Time left before the access token expires (negative once expired).
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// True when the token must be refreshed before use, given a padding window.
    pub fn needs_refresh_within(&self, padding: Duration, now: DateTime<Utc>) -> bool {
        self.token_status == TokenStatus::NeedsRefresh || self.time_until_expiry(now) <= padding
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Installation view with credentials stripped, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationSummary {
    pub id: String,
    pub location_id: Option<String>,
    pub token_status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub has_refresh_token: bool,
}

impl From<&Installation> for InstallationSummary {
    fn from(inst: &Installation) -> Self {
        Self {
            id: inst.id.clone(),
            location_id: inst.location_id.clone(),
            token_status: inst.token_status,
            expires_at: inst.expires_at,
            scopes: inst.scopes.clone(),
            has_refresh_token: inst.refresh_token.is_some(),
        }
    }
}
