use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::MessageResponse,
        extractors::CurrentUser,
        services::check_new_password,
    },
    error::AppError,
    state::AppState,
    users::dto::{
        PasswordChangedUser, ProfileResponse, UpdatePasswordRequest, UpdatePasswordResponse,
        UserListResponse, UserSummary,
    },
};

const RESTRICTED_PROFILE_FIELDS: [&str; 5] =
    ["email", "password", "confirmPassword", "role", "active"];

pub async fn profile(state: &AppState, current: &CurrentUser) -> Result<ProfileResponse, AppError> {
    let user = state
        .users
        .find_by_id(current.user.id)
        .await?
        .unwrap_or_else(|| current.user.clone());
    Ok(user.into())
}

/// Only `name` is writable here; credentials, role and status have their own flows.
pub async fn update_profile(
    state: &AppState,
    current: &CurrentUser,
    body: Map<String, Value>,
) -> Result<ProfileResponse, AppError> {
    if body
        .keys()
        .any(|k| RESTRICTED_PROFILE_FIELDS.contains(&k.as_str()))
    {
        return Err(AppError::BadRequest(
            "You cannot update email, password, role or active status using this endpoint."
                .into(),
        ));
    }

    let name = match body.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => return Err(AppError::Validation(vec!["Please enter your name".into()])),
        None => {
            return Err(AppError::BadRequest(
                "You have not provided any permissible fields for updating.".into(),
            ))
        }
    };

    let user = state
        .users
        .update_name(current.user.id, &name)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("User with ID \"{}\" not found.", current.user.id))
        })?;
    info!(user_id = %user.id, "profile updated");
    Ok(user.into())
}

/// Changes the password, which also makes every older token stale, and revokes the one presented.
/// Passwords are trimmed as at login.
pub async fn update_password(
    state: &AppState,
    current: &CurrentUser,
    req: UpdatePasswordRequest,
) -> Result<UpdatePasswordResponse, AppError> {
    let (Some(current_password), Some(new_password), Some(confirm)) = (
        req.current_password.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        req.new_password.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        req.confirm_password.as_deref().map(str::trim).filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Missing new password, confirm password or current password.".into(),
        ));
    };
    if new_password == current_password {
        return Err(AppError::BadRequest(
            "The new password must be different from the current password.".into(),
        ));
    }

    if !state
        .credentials
        .verify(current_password, &current.user.password_hash)
        .await?
    {
        warn!(user_id = %current.user.id, "password update with wrong current password");
        return Err(AppError::Unauthenticated(
            "The current password you provided is wrong.".into(),
        ));
    }

    let mut errors = Vec::new();
    check_new_password(Some(new_password), Some(confirm), &mut errors);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let hash = state.credentials.hash(new_password).await?;
    let user = state
        .users
        .update_password(current.user.id, &hash, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| {
            AppError::Unauthenticated("The current password you provided is wrong.".into())
        })?;
    state.revocations.revoke(user.id, &current.claims).await?;

    info!(user_id = %user.id, "password updated");
    Ok(UpdatePasswordResponse {
        message: "Your password has been updated successfully.".into(),
        user: PasswordChangedUser {
            id: user.id,
            name: user.name,
            email: user.email,
            password_changed_at: user.password_changed_at,
        },
    })
}

pub async fn deactivate(state: &AppState, current: &CurrentUser) -> Result<MessageResponse, AppError> {
    state.users.set_active(current.user.id, false).await?;
    state
        .revocations
        .revoke(current.user.id, &current.claims)
        .await?;
    info!(user_id = %current.user.id, "account deactivated");
    Ok(MessageResponse::new("Your account has been deactivated."))
}

pub async fn list_users(state: &AppState) -> Result<UserListResponse, AppError> {
    let users: Vec<ProfileResponse> = state
        .users
        .list()
        .await?
        .into_iter()
        .map(ProfileResponse::from)
        .collect();
    Ok(UserListResponse {
        count: users.len(),
        users,
    })
}

pub async fn get_user(state: &AppState, id: Uuid) -> Result<UserSummary, AppError> {
    match state.users.find_by_id(id).await? {
        Some(user) if user.active => Ok(UserSummary {
            id: user.id,
            name: user.name,
        }),
        _ => Err(AppError::NotFound(format!("User with ID \"{id}\" not found."))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        extractors::AuthenticationGate,
        repo_types::{NewUser, Role},
    };
    use axum::extract::FromRef;
    use serde_json::json;

    const PASSWORD: &str = "bob1234567";

    async fn logged_in() -> (AppState, CurrentUser) {
        let (state, _repo, _mailer) = AppState::fake();
        let user = state
            .users
            .create(NewUser {
                email: "bob@x.com".into(),
                name: "bob".into(),
                password_hash: state.credentials.hash(PASSWORD).await.unwrap(),
                role: Role::User,
            })
            .await
            .unwrap();
        let token = state.tokens.sign(user.id).unwrap();
        let current = AuthenticationGate::from_ref(&state)
            .authenticate(Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        (state, current)
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn update_profile_rejects_restricted_fields() {
        let (state, current) = logged_in().await;
        let err = update_profile(&state, &current, as_map(json!({"name": "x", "role": "admin"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let ok = update_profile(&state, &current, as_map(json!({"name": " robert "})))
            .await
            .unwrap();
        assert_eq!(ok.name, "robert");
        assert_eq!(ok.role, Role::User);
    }

    #[tokio::test]
    async fn update_password_checks_current_password() {
        let (state, current) = logged_in().await;
        let err = update_password(
            &state,
            &current,
            UpdatePasswordRequest {
                current_password: Some("wrong-password".into()),
                new_password: Some("brand-new-pass".into()),
                confirm_password: Some("brand-new-pass".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn update_password_revokes_presented_token() {
        let (state, current) = logged_in().await;
        let res = update_password(
            &state,
            &current,
            UpdatePasswordRequest {
                current_password: Some(PASSWORD.into()),
                new_password: Some("brand-new-pass".into()),
                confirm_password: Some("brand-new-pass".into()),
            },
        )
        .await
        .unwrap();
        assert!(res.user.password_changed_at.is_some());
        assert!(state
            .revocations
            .is_revoked(current.user.id, &current.claims)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn deactivated_user_is_hidden_from_lookup() {
        let (state, current) = logged_in().await;
        assert_eq!(get_user(&state, current.user.id).await.unwrap().name, "bob");

        deactivate(&state, &current).await.unwrap();
        let err = get_user(&state, current.user.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(list_users(&state).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn current_password_is_trimmed_like_login() {
        let (state, current) = logged_in().await;
        let res = update_password(
            &state,
            &current,
            UpdatePasswordRequest {
                current_password: Some(format!(" {PASSWORD} ")),
                new_password: Some("brand-new-pass".into()),
                confirm_password: Some("brand-new-pass".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(res.user.id, current.user.id);
    }
}
