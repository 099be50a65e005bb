use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::{error::AuthError, repo::RepoError};

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

/// HTTP-facing error. 4xx variants are operational and their message goes to the client
/// verbatim; `Internal` is logged and replaced by a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input data: {}.", .0.join(". "))]
    Validation(Vec<String>),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("There was an error sending password reset email. Please try again later.")]
    EmailDelivery,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Full error chain of an internal fault, stashed in the response for the development layer.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::EmailDelivery | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(e: impl Into<anyhow::Error>) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Duplicate { field } => {
                AppError::Conflict(format!("There is already a record with this {field}."))
            }
            RepoError::Database(e) => AppError::internal(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidInput(msg) => AppError::BadRequest(msg),
            e if e.is_unauthenticated() => AppError::Unauthenticated(e.to_string()),
            AuthError::Forbidden => AppError::Forbidden(AuthError::Forbidden.to_string()),
            e @ (AuthError::ResetTokenInvalid | AuthError::SamePassword) => {
                AppError::BadRequest(e.to_string())
            }
            AuthError::Storage(e) => e.into(),
            other => AppError::internal(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = if status.is_server_error() { "error" } else { "fail" };

        let (message, detail) = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                (GENERIC_ERROR_MESSAGE.to_string(), Some(format!("{e:#}")))
            }
            other => (other.to_string(), None),
        };

        let mut res = (status, Json(json!({ "status": kind, "message": message }))).into_response();
        if let Some(detail) = detail {
            res.extensions_mut().insert(ErrorDetail(detail));
        }
        res
    }
}

/// Development-only response layer: re-renders internal faults with their error chain.
pub async fn attach_error_detail(res: Response) -> Response {
    let Some(ErrorDetail(detail)) = res.extensions().get::<ErrorDetail>().cloned() else {
        return res;
    };
    let body = json!({
        "status": "error",
        "message": GENERIC_ERROR_MESSAGE,
        "detail": detail,
    });
    (res.status(), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = AppError::Validation(vec![
            "Please provide a valid email".into(),
            "Passwords do not match".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid input data: Please provide a valid email. Passwords do not match."
        );
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        let cases = [
            (AuthError::MissingToken, StatusCode::UNAUTHORIZED),
            (AuthError::TokenExpired, StatusCode::UNAUTHORIZED),
            (AuthError::StalePassword, StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::ResetTokenInvalid, StatusCode::BAD_REQUEST),
            (AuthError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::Hashing("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (auth, status) in cases {
            assert_eq!(AppError::from(auth).status_code(), status);
        }
    }

    #[test]
    fn internal_error_hides_detail_but_carries_it_in_extensions() {
        let res = AppError::internal(anyhow::anyhow!("db exploded")).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = res.extensions().get::<ErrorDetail>().unwrap();
        assert!(detail.0.contains("db exploded"));
    }

    #[test]
    fn database_failure_becomes_internal() {
        let err = AppError::from(RepoError::Database(sqlx::Error::RowNotFound));
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
