use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::{error::AuthError, jwt::Claims, repo::UserRepository};

/// Per-user set of explicitly invalidated token IDs.
///
/// An entry lives exactly as long as the token it names; past that point the token fails
/// verification on its own and the entry is swept.
#[derive(Clone)]
pub struct RevocationRegistry {
    repo: Arc<dyn UserRepository>,
}

impl RevocationRegistry {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    pub async fn revoke(&self, user_id: Uuid, claims: &Claims) -> Result<(), AuthError> {
        self.repo
            .add_revoked_token(user_id, &claims.jti, claims.expires_at())
            .await?;
        debug!(user_id = %user_id, jti = %claims.jti, "token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, user_id: Uuid, claims: &Claims) -> Result<bool, AuthError> {
        Ok(self
            .repo
            .is_token_revoked(user_id, &claims.jti, OffsetDateTime::now_utc())
            .await?)
    }

    pub async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, AuthError> {
        Ok(self.repo.purge_revoked_tokens(now).await?)
    }

    /// Runs `purge_expired` every `every` until the task is dropped.
    pub fn spawn_sweeper(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.purge_expired(OffsetDateTime::now_utc()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "purged expired revocation entries"),
                    Err(e) => error!(error = %e, "revocation sweep failed"),
                }
            }
        })
    }
}
