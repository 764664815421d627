//! OAuth token lifecycle: upstream token exchange, per-installation
//! single-flight refresh, and JWT diagnostics.

pub mod client;
pub mod jwt;
pub mod manager;

use thiserror::Error;

pub use client::{OAuthCredentials, TokenClient, TokenResponse};
pub use manager::{HealthReport, TokenAccess, TokenManager};

/// Refresh failures. `Clone` so one in-flight result can be handed to every
/// waiting caller.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("installation {0} not found")]
    NotFound(String),

    #[error("installation {0} has no refresh token; reinstallation required")]
    NoRefreshToken(String),

    #[error("token endpoint rejected refresh (status {status:?}): {body}")]
    UpstreamRejected { status: Option<u16>, body: String },

    #[error("installation store error: {0}")]
    Store(String),
}

impl RefreshError {
    /// True when only a new OAuth installation can recover the record.
    pub fn requires_reinstall(&self) -> bool {
        matches!(
            self,
            RefreshError::NoRefreshToken(_) | RefreshError::UpstreamRejected { .. }
        )
    }
}

impl From<crate::store::StoreError> for RefreshError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(id) => RefreshError::NotFound(id),
            other => RefreshError::Store(other.to_string()),
        }
    }
}
