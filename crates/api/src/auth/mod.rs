pub mod identity;
pub mod jwt;

pub use identity::{AuthOutcome, Identity, IdentityVerifier, RejectReason};
pub use jwt::{JwtConfig, JwtVerifier};
