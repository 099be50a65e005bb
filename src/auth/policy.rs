use tracing::warn;

use crate::auth::{
    error::AuthError,
    repo_types::{Role, User},
};

/// Role check applied after the authentication gate.
pub struct AuthorizationPolicy;

impl AuthorizationPolicy {
    pub fn require(user: &User, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&user.role) {
            Ok(())
        } else {
            warn!(user_id = %user.id, role = %user.role, "permission denied");
            Err(AuthError::Forbidden)
        }
    }
}
