use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Json, Router,
};
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        dto::MessageResponse, extractors::CurrentUser, policy::AuthorizationPolicy,
        repo_types::Role,
    },
    error::AppError,
    state::AppState,
    users::{
        dto::{
            ProfileResponse, UpdatePasswordRequest, UpdatePasswordResponse, UserListResponse,
            UserSummary,
        },
        services,
    },
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/profile",
            get(get_profile).patch(update_profile).delete(deactivate_profile),
        )
        .route("/users/profile/password", patch(update_password))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
}

#[instrument(skip(state, current), fields(user_id = %current.user.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(services::profile(&state, &current).await?))
}

#[instrument(skip(state, current, body), fields(user_id = %current.user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(services::update_profile(&state, &current, body).await?))
}

#[instrument(skip(state, current, payload), fields(user_id = %current.user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Json<UpdatePasswordResponse>, AppError> {
    Ok(Json(services::update_password(&state, &current, payload).await?))
}

#[instrument(skip(state, current), fields(user_id = %current.user.id))]
pub async fn deactivate_profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(services::deactivate(&state, &current).await?))
}

#[instrument(skip(state, current), fields(user_id = %current.user.id))]
pub async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<UserListResponse>, AppError> {
    AuthorizationPolicy::require(&current.user, &[Role::Admin])?;
    Ok(Json(services::list_users(&state).await?))
}

#[instrument(skip(state, current), fields(user_id = %current.user.id))]
pub async fn get_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserSummary>, AppError> {
    AuthorizationPolicy::require(&current.user, &[Role::Admin])?;
    Ok(Json(services::get_user(&state, id).await?))
}
