use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::error;

use crate::{auth::error::AuthError, config::PasswordConfig};

pub const MIN_PASSWORD_LEN: usize = 10;

/// One-way password custody. Hashes are Argon2id PHC strings carrying their own salt and
/// parameters, so a work-factor change only affects newly written hashes.
#[derive(Clone)]
pub struct CredentialStore {
    params: Params,
}

impl CredentialStore {
    pub fn new(config: &PasswordConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(params: Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    pub async fn hash(&self, plain: &str) -> Result<String, AuthError> {
        if plain.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters long."
            )));
        }
        let params = self.params.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Self::argon2(params)
                .hash_password(plain.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| {
                    error!(error = %e, "argon2 hash_password error");
                    AuthError::Hashing(e.to_string())
                })
        })
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    /// `Ok(false)` on mismatch; an unparseable stored hash is an error.
    pub async fn verify(&self, plain: &str, hash: &str) -> Result<bool, AuthError> {
        let params = self.params.clone();
        let plain = plain.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash).map_err(|e| {
                error!(error = %e, "argon2 parse hash error");
                AuthError::Hashing(e.to_string())
            })?;
            match Self::argon2(params).verify_password(plain.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(AuthError::Hashing(e.to_string())),
            }
        })
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
    }
}
