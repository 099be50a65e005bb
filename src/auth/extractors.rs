use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::{
    auth::{
        error::AuthError,
        jwt::{unix_millis, Claims, TokenService},
        repo::UserRepository,
        repo_types::User,
        revocation::RevocationRegistry,
    },
    error::AppError,
    state::AppState,
};

/// Bearer token from an `Authorization` header value. Empty and `undefined` count as absent.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    match token {
        "" | "undefined" => None,
        t => Some(t),
    }
}

/// Resolves a presented session token to its user, or says why it is not acceptable.
#[derive(Clone)]
pub struct AuthenticationGate {
    tokens: TokenService,
    revocations: RevocationRegistry,
    users: Arc<dyn UserRepository>,
}

impl FromRef<AppState> for AuthenticationGate {
    fn from_ref(state: &AppState) -> Self {
        Self {
            tokens: state.tokens.clone(),
            revocations: state.revocations.clone(),
            users: state.users.clone(),
        }
    }
}

impl AuthenticationGate {
    pub async fn authenticate(&self, header: Option<&str>) -> Result<CurrentUser, AuthError> {
        let token = bearer_token(header).ok_or(AuthError::MissingToken)?;
        let claims = self.tokens.verify(token)?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        if self.revocations.is_revoked(user.id, &claims).await? {
            return Err(AuthError::TokenRevoked);
        }

        if let Some(changed_at) = user.password_changed_at {
            if claims.iat_ms < unix_millis(changed_at) {
                return Err(AuthError::StalePassword);
            }
        }

        Ok(CurrentUser { user, claims })
    }
}

/// The authenticated caller and the claims of the token presented.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        AuthenticationGate::from_ref(state)
            .authenticate(header)
            .await
            .map_err(|e| {
                if e.is_unauthenticated() {
                    warn!(reason = %e, "authentication rejected");
                }
                AppError::from(e)
            })
    }
}
