use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::auth::{
    error::AuthError,
    password::CredentialStore,
    repo::UserRepository,
    repo_types::{ResetTicket, User},
};

const RESET_TOKEN_BYTES: usize = 32;

fn digest(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Issues and redeems single-use password-reset credentials.
/// Only the SHA-256 digest of a credential is ever stored.
#[derive(Clone)]
pub struct PasswordResetService {
    repo: Arc<dyn UserRepository>,
    credentials: CredentialStore,
    ttl: Duration,
}

impl PasswordResetService {
    pub fn new(repo: Arc<dyn UserRepository>, credentials: CredentialStore, ttl_minutes: i64) -> Self {
        Self {
            repo,
            credentials,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Returns the plaintext credential. A previous outstanding one is overwritten.
    pub async fn issue(&self, user: &User) -> Result<String, AuthError> {
        self.issue_at(user, OffsetDateTime::now_utc()).await
    }

    pub async fn issue_at(&self, user: &User, now: OffsetDateTime) -> Result<String, AuthError> {
        let mut raw = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        let plain = hex::encode(raw);
        let ticket = ResetTicket {
            token_hash: digest(&plain),
            expires_at: now + self.ttl,
        };
        self.repo.set_reset_ticket(user.id, Some(&ticket)).await?;
        info!(user_id = %user.id, "password reset credential issued");
        Ok(plain)
    }

    pub async fn discard(&self, user: &User) -> Result<(), AuthError> {
        self.repo.set_reset_ticket(user.id, None).await?;
        Ok(())
    }

    pub async fn consume(&self, plain: &str, new_password: &str) -> Result<User, AuthError> {
        self.consume_at(plain, new_password, OffsetDateTime::now_utc())
            .await
    }

    /// Wrong and expired credentials both yield `ResetTokenInvalid`.
    pub async fn consume_at(
        &self,
        plain: &str,
        new_password: &str,
        now: OffsetDateTime,
    ) -> Result<User, AuthError> {
        let token_hash = digest(plain);
        let user = self
            .repo
            .find_by_reset_token_hash(&token_hash, now)
            .await?
            .ok_or(AuthError::ResetTokenInvalid)?;
        let live = user.reset_ticket().is_some_and(|t| {
            bool::from(t.token_hash.as_bytes().ct_eq(token_hash.as_bytes())) && t.expires_at > now
        });
        if !live {
            return Err(AuthError::ResetTokenInvalid);
        }

        if self.credentials.verify(new_password, &user.password_hash).await? {
            warn!(user_id = %user.id, "reset rejected: password unchanged");
            return Err(AuthError::SamePassword);
        }
        let new_hash = self.credentials.hash(new_password).await?;

        // Conditional on the same credential still being outstanding.
        let updated = self
            .repo
            .complete_password_reset(user.id, &token_hash, &new_hash, now)
            .await?
            .ok_or(AuthError::ResetTokenInvalid)?;
        info!(user_id = %updated.id, "password reset completed");
        Ok(updated)
    }
}
