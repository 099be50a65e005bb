use thiserror::Error;

use crate::auth::repo::RepoError;

/// Failures raised by the identity components. Handlers convert these into `AppError`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("You are not logged in.")]
    MissingToken,
    #[error("Your session has expired. Please login again.")]
    TokenExpired,
    #[error("Invalid token. Please login again.")]
    TokenMalformed,
    #[error("The user with the given token does not exist.")]
    UnknownUser,
    #[error("The given token is no longer valid. Please login again.")]
    TokenRevoked,
    #[error("The password has been changed recently. Please login again.")]
    StalePassword,
    #[error("You do not have permission to perform this action.")]
    Forbidden,
    #[error("Password reset token either expired or is invalid.")]
    ResetTokenInvalid,
    #[error("New password must not be the same as the old password.")]
    SamePassword,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Storage(#[from] RepoError),
}

impl AuthError {
    /// True for failures that should be reported to the client as 401.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken
                | AuthError::TokenExpired
                | AuthError::TokenMalformed
                | AuthError::UnknownUser
                | AuthError::TokenRevoked
                | AuthError::StalePassword
        )
    }
}
