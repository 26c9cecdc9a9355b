//! HS256 access tokens.
//!
//! Tokens are minted by the identity service; the platform only verifies
//! them. [`generate_access_token`] exists for operators and tests that need
//! to mint a token with the shared secret.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use stampede_core::types::DbId;
use uuid::Uuid;

use super::identity::{AuthOutcome, Identity, IdentityVerifier, RejectReason};

/// JWT claims carried by every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's id.
    pub sub: DbId,
    /// The user's role name (e.g. `"admin"`, `"user"`).
    pub role: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4).
    pub jti: String,
    /// Set while the holder still owes a second factor.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mfa_pending: bool,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret shared with the identity service.
    pub secret: String,
    /// Lifetime of tokens minted by [`generate_access_token`] (default: 15).
    pub access_token_expiry_mins: i64,
}

const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                  | Required | Default |
    /// |--------------------------|----------|---------|
    /// | `JWT_SECRET`             | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS` | no       | `15`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        Self {
            secret,
            access_token_expiry_mins,
        }
    }
}

/// Mint an HS256 access token for `user_id` with `role`.
pub fn generate_access_token(
    user_id: DbId,
    role: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        exp: now + config.access_token_expiry_mins * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        mfa_pending: false,
    };
    encode_claims(&claims, config)
}

/// Sign arbitrary claims with the configured secret.
pub fn encode_claims(
    claims: &Claims,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(), // HS256
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
///
/// Validates the signature and expiration.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )?;
    Ok(token_data.claims)
}

/// [`IdentityVerifier`] backed by the shared HS256 secret.
pub struct JwtVerifier {
    config: JwtConfig,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> AuthOutcome {
        match validate_token(token, &self.config) {
            Ok(claims) if claims.mfa_pending => AuthOutcome::Rejected {
                reason: RejectReason::MfaRequired,
            },
            Ok(claims) => AuthOutcome::Verified(Identity {
                user_id: claims.sub,
                role: claims.role,
            }),
            Err(e) => {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => RejectReason::Expired,
                    _ => RejectReason::InvalidCredentials,
                };
                tracing::debug!(error = %e, reason = reason.as_str(), "Token rejected");
                AuthOutcome::Rejected { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "unit-test-secret".to_string(),
            access_token_expiry_mins: 15,
        }
    }

    #[tokio::test]
    async fn verifies_freshly_minted_token() {
        let config = config();
        let token = generate_access_token(42, "admin", &config).unwrap();

        let outcome = JwtVerifier::new(config).verify(&token).await;

        assert_eq!(
            outcome,
            AuthOutcome::Verified(Identity { user_id: 42, role: "admin".into() })
        );
    }

    #[tokio::test]
    async fn expired_token_is_rejected_as_expired() {
        let config = config();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: 1,
            role: "user".into(),
            exp: now - 3600,
            iat: now - 7200,
            jti: Uuid::new_v4().to_string(),
            mfa_pending: false,
        };
        let token = encode_claims(&claims, &config).unwrap();

        let outcome = JwtVerifier::new(config).verify(&token).await;

        assert_matches!(outcome, AuthOutcome::Rejected { reason: RejectReason::Expired });
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_credentials() {
        let token = generate_access_token(1, "user", &config()).unwrap();
        let other = JwtVerifier::new(JwtConfig {
            secret: "another-secret".into(),
            access_token_expiry_mins: 15,
        });

        assert_matches!(
            other.verify(&token).await,
            AuthOutcome::Rejected { reason: RejectReason::InvalidCredentials }
        );
        assert_matches!(
            other.verify("not-a-jwt").await,
            AuthOutcome::Rejected { reason: RejectReason::InvalidCredentials }
        );
    }

    #[tokio::test]
    async fn pending_mfa_is_rejected() {
        let config = config();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: 3,
            role: "user".into(),
            exp: now + 600,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            mfa_pending: true,
        };
        let token = encode_claims(&claims, &config).unwrap();

        assert_matches!(
            JwtVerifier::new(config).verify(&token).await,
            AuthOutcome::Rejected { reason: RejectReason::MfaRequired }
        );
    }
}
