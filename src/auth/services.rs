use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, PublicUser,
            ResetPasswordRequest, ResetPasswordResponse, ResetUser, SignupRequest, SignupResponse,
        },
        extractors::CurrentUser,
        password::MIN_PASSWORD_LEN,
        repo::RepoError,
        repo_types::{NewUser, Role},
    },
    error::AppError,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Checks a new password and its confirmation, appending one message per violation.
pub(crate) fn check_new_password(
    password: Option<&str>,
    confirm: Option<&str>,
    errors: &mut Vec<String>,
) {
    match password {
        None => errors.push("Please enter your password".into()),
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => errors.push(format!(
            "Password must have at least {MIN_PASSWORD_LEN} characters"
        )),
        Some(_) => {}
    }
    match confirm {
        None => errors.push("Please confirm your password".into()),
        Some(c) if password.is_some_and(|p| p != c) => {
            errors.push("Password entered does not match".into())
        }
        Some(_) => {}
    }
}

struct ValidSignup {
    name: String,
    email: String,
    password: String,
}

fn validate_signup(req: SignupRequest) -> Result<ValidSignup, AppError> {
    let mut errors = Vec::new();

    let name = present(&req.name).map(str::to_string);
    if name.is_none() {
        errors.push("Please enter your name".into());
    }

    let email = present(&req.email).map(normalize_email);
    match &email {
        None => errors.push("Please enter your email".into()),
        Some(e) if !is_valid_email(e) => errors.push(format!("{e} is not a valid email!")),
        Some(_) => {}
    }

    let password = present(&req.password);
    check_new_password(password, present(&req.confirm_password), &mut errors);

    match (name, email, password) {
        (Some(name), Some(email), Some(password)) if errors.is_empty() => Ok(ValidSignup {
            name,
            email,
            password: password.to_string(),
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

/// validate, hash, persist
pub async fn signup(state: &AppState, req: SignupRequest) -> Result<SignupResponse, AppError> {
    let input = validate_signup(req).map_err(|e| {
        warn!(reason = %e, "signup rejected");
        e
    })?;

    let password_hash = state.credentials.hash(&input.password).await?;

    let user = state
        .users
        .create(NewUser {
            email: input.email.clone(),
            name: input.name,
            password_hash,
            role: Role::User,
        })
        .await
        .map_err(|e| match e {
            RepoError::Duplicate { .. } => {
                warn!(email = %input.email, "email already registered");
                AppError::Conflict(format!(
                    "There is already a record with the email \"{}\".",
                    input.email
                ))
            }
            other => other.into(),
        })?;

    info!(user_id = %user.id, "user signed up");
    Ok(SignupResponse {
        id: user.id,
        name: user.name,
        created_at: user.created_at,
    })
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<LoginResponse, AppError> {
    let (Some(email), Some(password)) = (present(&req.email), present(&req.password)) else {
        return Err(AppError::BadRequest(
            "Please provide your email and password.".into(),
        ));
    };
    let email = normalize_email(email);

    let Some(mut user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::NotFound(format!(
            "Could not find a user for the given email {email}."
        )));
    };

    if !state.credentials.verify(password, &user.password_hash).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthenticated("Incorrect password.".into()));
    }

    if !user.active {
        if let Some(reactivated) = state.users.set_active(user.id, true).await? {
            info!(user_id = %user.id, "account reactivated on login");
            user = reactivated;
        }
    }

    let token = state.tokens.sign(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginResponse {
        token,
        user: PublicUser {
            id: user.id,
            name: user.name,
        },
    })
}

pub async fn logout(state: &AppState, current: &CurrentUser) -> Result<MessageResponse, AppError> {
    state
        .revocations
        .revoke(current.user.id, &current.claims)
        .await?;
    info!(user_id = %current.user.id, "user logged out");
    Ok(MessageResponse::new(format!(
        "User \"{}\" successfully logged out.",
        current.user.name
    )))
}

fn reset_email_body(link: &str, ttl_minutes: i64) -> String {
    format!(
        "We have received a password reset request. Please use the link below to reset \
         your password.\n\n{link}\n\nThis reset password link will be valid only for \
         {ttl_minutes} minutes."
    )
}

/// The credential is persisted before the email goes out and discarded if sending fails.
pub async fn forgot_password(
    state: &AppState,
    req: ForgotPasswordRequest,
) -> Result<MessageResponse, AppError> {
    let Some(email) = present(&req.email).map(normalize_email) else {
        return Err(AppError::BadRequest("Email is required.".into()));
    };

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "password reset for unknown email");
        return Err(AppError::NotFound(format!(
            "Could not find a user for the given email {email}."
        )));
    };

    let credential = state.resets.issue(&user).await?;
    let reset = &state.config.reset;
    let link = format!(
        "{}/api/v1/auth/resetPassword/{credential}",
        reset.link_base_url.trim_end_matches('/')
    );

    let sent = state
        .mailer
        .send(
            &user.email,
            "Password reset request received.",
            &reset_email_body(&link, reset.ttl_minutes),
        )
        .await;

    if let Err(e) = sent {
        error!(error = ?e, user_id = %user.id, "password reset email failed");
        if let Err(discard) = state.resets.discard(&user).await {
            error!(error = %discard, user_id = %user.id, "could not discard reset credential");
        }
        return Err(AppError::EmailDelivery);
    }

    info!(user_id = %user.id, "password reset email sent");
    Ok(MessageResponse::new("Password reset link sent to the user email."))
}

pub async fn reset_password(
    state: &AppState,
    credential: &str,
    req: ResetPasswordRequest,
) -> Result<ResetPasswordResponse, AppError> {
    let (Some(new_password), Some(confirm)) =
        (present(&req.new_password), present(&req.confirm_password))
    else {
        return Err(AppError::BadRequest(
            "Please enter new password and confirm password.".into(),
        ));
    };
    if new_password != confirm {
        return Err(AppError::Validation(vec![
            "Password entered does not match".into(),
        ]));
    }

    let user = state.resets.consume(credential, new_password).await.map_err(|e| {
        warn!(reason = %e, "password reset rejected");
        AppError::from(e)
    })?;

    let token = state.tokens.sign(user.id)?;
    Ok(ResetPasswordResponse {
        token,
        user: ResetUser {
            id: user.id,
            name: user.name,
            password_changed_at: user.password_changed_at,
        },
    })
}
