use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, ResetTicket, User, USER_COLUMNS};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("a record with this {field} already exists")]
    Duplicate { field: &'static str },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Storage capability for user records and their revoked session tokens.
///
/// Every mutating method is a single atomic statement at the storage layer; callers never
/// read-modify-write a whole record.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    /// User whose outstanding reset digest equals `token_hash` and has not expired at `now`.
    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError>;
    async fn create(&self, new_user: NewUser) -> Result<User, RepoError>;
    async fn list(&self) -> Result<Vec<User>, RepoError>;
    async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, RepoError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError>;
    /// Writes or clears both reset columns at once.
    async fn set_reset_ticket(
        &self,
        id: Uuid,
        ticket: Option<&ResetTicket>,
    ) -> Result<(), RepoError>;
    /// Replaces the hash, stamps `password_changed_at` and clears any reset ticket.
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, RepoError>;
    /// Like `update_password`, but only while `token_hash` is still the live ticket.
    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError>;
    async fn add_revoked_token(
        &self,
        user_id: Uuid,
        token_id: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError>;
    async fn is_token_revoked(
        &self,
        user_id: Uuid,
        token_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, RepoError>;
    /// Drops revocation entries whose token has expired. Returns how many were removed.
    async fn purge_revoked_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}

// ---- Postgres ----

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_insert_error(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepoError::Duplicate { field: "email" }
        }
        _ => RepoError::Database(e),
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE password_reset_token_hash = $1
              AND password_reset_token_expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.password_hash)
        .bind(new_user.role)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn list(&self) -> Result<Vec<User>, RepoError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET name = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_reset_ticket(
        &self,
        id: Uuid,
        ticket: Option<&ResetTicket>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token_hash = $2,
                password_reset_token_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ticket.map(|t| t.token_hash.as_str()))
        .bind(ticket.map(|t| t.expires_at))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = $3,
                password_reset_token_hash = NULL,
                password_reset_token_expires_at = NULL,
                updated_at = $3
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                password_changed_at = $4,
                password_reset_token_hash = NULL,
                password_reset_token_expires_at = NULL,
                updated_at = $4
            WHERE id = $1
              AND password_reset_token_hash = $2
              AND password_reset_token_expires_at > $4
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(token_hash)
        .bind(password_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn add_revoked_token(
        &self,
        user_id: Uuid,
        token_id: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (user_id, token_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, token_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn is_token_revoked(
        &self,
        user_id: Uuid,
        token_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM revoked_tokens
                WHERE user_id = $1 AND token_id = $2 AND expires_at > $3
            )
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        Ok(revoked)
    }

    async fn purge_revoked_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let done = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }
}

// ---- In-memory ----

#[cfg(test)]
pub use memory::MemoryUserRepository;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;

    use subtle::ConstantTimeEq;
    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    struct MemoryInner {
        users: HashMap<Uuid, User>,
        revoked: HashMap<(Uuid, String), OffsetDateTime>,
    }

    /// Process-local repository used by tests and the fake application state.
    /// A single lock guards every statement, which gives the same atomicity as the SQL version.
    #[derive(Default)]
    pub struct MemoryUserRepository {
        inner: RwLock<MemoryInner>,
    }

    impl MemoryUserRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Overwrites a stored record as-is; lets tests set up states the API never produces.
        pub async fn put(&self, user: User) {
            self.inner.write().await.users.insert(user.id, user);
        }

        pub async fn revoked_count(&self) -> usize {
            self.inner.read().await.revoked.len()
        }
    }

    fn digest_matches(stored: &str, candidate: &str) -> bool {
        stored.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
            Ok(self.inner.read().await.users.get(&id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
            let inner = self.inner.read().await;
            Ok(inner.users.values().find(|u| u.email == email).cloned())
        }

        async fn find_by_reset_token_hash(
            &self,
            token_hash: &str,
            now: OffsetDateTime,
        ) -> Result<Option<User>, RepoError> {
            let inner = self.inner.read().await;
            Ok(inner
                .users
                .values()
                .find(|u| {
                    u.reset_ticket().is_some_and(|t| {
                        digest_matches(&t.token_hash, token_hash) && t.expires_at > now
                    })
                })
                .cloned())
        }

        async fn create(&self, new_user: NewUser) -> Result<User, RepoError> {
            let mut inner = self.inner.write().await;
            if inner.users.values().any(|u| u.email == new_user.email) {
                return Err(RepoError::Duplicate { field: "email" });
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                email: new_user.email,
                name: new_user.name,
                password_hash: new_user.password_hash,
                role: new_user.role,
                active: true,
                password_changed_at: None,
                password_reset_token_hash: None,
                password_reset_token_expires_at: None,
                created_at: now,
                updated_at: now,
            };
            inner.users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn list(&self) -> Result<Vec<User>, RepoError> {
            let inner = self.inner.read().await;
            let mut users: Vec<User> = inner.users.values().cloned().collect();
            users.sort_by_key(|u| u.created_at);
            Ok(users)
        }

        async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>, RepoError> {
            let mut inner = self.inner.write().await;
            Ok(inner.users.get_mut(&id).map(|u| {
                u.name = name.to_string();
                u.updated_at = OffsetDateTime::now_utc();
                u.clone()
            }))
        }

        async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError> {
            let mut inner = self.inner.write().await;
            Ok(inner.users.get_mut(&id).map(|u| {
                u.active = active;
                u.updated_at = OffsetDateTime::now_utc();
                u.clone()
            }))
        }

        async fn set_reset_ticket(
            &self,
            id: Uuid,
            ticket: Option<&ResetTicket>,
        ) -> Result<(), RepoError> {
            let mut inner = self.inner.write().await;
            if let Some(u) = inner.users.get_mut(&id) {
                u.password_reset_token_hash = ticket.map(|t| t.token_hash.clone());
                u.password_reset_token_expires_at = ticket.map(|t| t.expires_at);
            }
            Ok(())
        }

        async fn update_password(
            &self,
            id: Uuid,
            password_hash: &str,
            changed_at: OffsetDateTime,
        ) -> Result<Option<User>, RepoError> {
            let mut inner = self.inner.write().await;
            Ok(inner.users.get_mut(&id).map(|u| {
                u.password_hash = password_hash.to_string();
                u.password_changed_at = Some(changed_at);
                u.password_reset_token_hash = None;
                u.password_reset_token_expires_at = None;
                u.updated_at = changed_at;
                u.clone()
            }))
        }

        async fn complete_password_reset(
            &self,
            id: Uuid,
            token_hash: &str,
            password_hash: &str,
            now: OffsetDateTime,
        ) -> Result<Option<User>, RepoError> {
            let mut inner = self.inner.write().await;
            let Some(u) = inner.users.get_mut(&id) else {
                return Ok(None);
            };
            let live = u
                .reset_ticket()
                .is_some_and(|t| digest_matches(&t.token_hash, token_hash) && t.expires_at > now);
            if !live {
                return Ok(None);
            }
            u.password_hash = password_hash.to_string();
            u.password_changed_at = Some(now);
            u.password_reset_token_hash = None;
            u.password_reset_token_expires_at = None;
            u.updated_at = now;
            Ok(Some(u.clone()))
        }

        async fn add_revoked_token(
            &self,
            user_id: Uuid,
            token_id: &str,
            expires_at: OffsetDateTime,
        ) -> Result<(), RepoError> {
            let mut inner = self.inner.write().await;
            inner
                .revoked
                .entry((user_id, token_id.to_string()))
                .or_insert(expires_at);
            Ok(())
        }

        async fn is_token_revoked(
            &self,
            user_id: Uuid,
            token_id: &str,
            now: OffsetDateTime,
        ) -> Result<bool, RepoError> {
            let inner = self.inner.read().await;
            Ok(inner
                .revoked
                .get(&(user_id, token_id.to_string()))
                .is_some_and(|expires_at| *expires_at > now))
        }

        async fn purge_revoked_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
            let mut inner = self.inner.write().await;
            let before = inner.revoked.len();
            inner.revoked.retain(|_, expires_at| *expires_at > now);
            Ok((before - inner.revoked.len()) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: "bob".into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let repo = MemoryUserRepository::new();
        repo.create(new_user("bob@x.com")).await.unwrap();
        let err = repo.create(new_user("bob@x.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Duplicate { field: "email" }));
    }

    #[tokio::test]
    async fn update_password_clears_reset_ticket() {
        let repo = MemoryUserRepository::new();
        let user = repo.create(new_user("bob@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        let ticket = ResetTicket {
            token_hash: "digest".into(),
            expires_at: now + Duration::minutes(10),
        };
        repo.set_reset_ticket(user.id, Some(&ticket)).await.unwrap();

        let updated = repo
            .update_password(user.id, "new-hash", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert_eq!(updated.password_changed_at, Some(now));
        assert!(updated.password_reset_token_hash.is_none());
        assert!(updated.password_reset_token_expires_at.is_none());
    }

    #[tokio::test]
    async fn complete_password_reset_only_once() {
        let repo = MemoryUserRepository::new();
        let user = repo.create(new_user("bob@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        let ticket = ResetTicket {
            token_hash: "digest".into(),
            expires_at: now + Duration::minutes(10),
        };
        repo.set_reset_ticket(user.id, Some(&ticket)).await.unwrap();

        let first = repo
            .complete_password_reset(user.id, "digest", "h1", now)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = repo
            .complete_password_reset(user.id, "digest", "h2", now)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn revoked_entries_expire_and_purge() {
        let repo = MemoryUserRepository::new();
        let user_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        repo.add_revoked_token(user_id, "a", now + Duration::minutes(5))
            .await
            .unwrap();
        repo.add_revoked_token(user_id, "b", now - Duration::minutes(5))
            .await
            .unwrap();

        assert!(repo.is_token_revoked(user_id, "a", now).await.unwrap());
        assert!(!repo.is_token_revoked(user_id, "b", now).await.unwrap());
        assert_eq!(repo.purge_revoked_tokens(now).await.unwrap(), 1);
        assert_eq!(repo.revoked_count().await, 1);
    }
}
