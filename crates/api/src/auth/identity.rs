//! The seam between the platform and the external identity service.
//!
//! HTTP handlers and the WebSocket handshake both hand a bearer token to an
//! [`IdentityVerifier`] and act on the returned [`AuthOutcome`].

use async_trait::async_trait;
use serde::Serialize;
use stampede_core::roles::is_admin;
use stampede_core::types::DbId;

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: DbId,
    pub role: String,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        is_admin(&self.role)
    }

    /// Admins may act on every job; everyone else only on their own.
    pub fn can_access_job(&self, owner_id: DbId) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Why a token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCredentials,
    Expired,
    /// The token is genuine but the holder has not completed MFA.
    MfaRequired,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::Expired => "expired",
            Self::MfaRequired => "mfa_required",
        }
    }

    /// Human-readable message for 401 bodies and close frames.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid token",
            Self::Expired => "Token has expired",
            Self::MfaRequired => "Multi-factor authentication required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Verified(Identity),
    Rejected { reason: RejectReason },
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AuthOutcome;
}
