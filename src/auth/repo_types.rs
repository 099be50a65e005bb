use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Access level of an account.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    pub role: Role,
    pub active: bool,
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_token_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// The outstanding reset credential, if both halves are present.
    pub fn reset_ticket(&self) -> Option<ResetTicket> {
        match (
            &self.password_reset_token_hash,
            self.password_reset_token_expires_at,
        ) {
            (Some(token_hash), Some(expires_at)) => Some(ResetTicket {
                token_hash: token_hash.clone(),
                expires_at,
            }),
            _ => None,
        }
    }
}

/// Digest and expiry of an outstanding password-reset credential.
///
/// The two reset columns are only ever written together through this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTicket {
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

/// Fields required to insert a user. The hash has already been computed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

pub(crate) const USER_COLUMNS: &str = "id, email, name, password_hash, role, active, \
     password_changed_at, password_reset_token_hash, password_reset_token_expires_at, \
     created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: "bob@x.com".into(),
            name: "bob".into(),
            password_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".into(),
            role: Role::User,
            active: true,
            password_changed_at: None,
            password_reset_token_hash: Some("abc".into()),
            password_reset_token_expires_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn secrets_are_not_serialized() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password_reset_token"));
        assert!(json.contains("bob@x.com"));
    }

    #[test]
    fn reset_ticket_requires_both_fields() {
        let mut user = sample_user();
        assert!(user.reset_ticket().is_some());
        user.password_reset_token_expires_at = None;
        assert!(user.reset_ticket().is_none());
    }

    #[test]
    fn role_round_trips_as_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
        assert_eq!(Role::default(), Role::User);
    }
}
