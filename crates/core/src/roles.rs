//! Well-known role name constants.
//!
//! Roles are issued by the external identity service and arrive inside
//! verified tokens; these are the only values the platform interprets.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Whether `role` grants access to every user's jobs and to node admin.
pub fn is_admin(role: &str) -> bool {
    role == ROLE_ADMIN
}
