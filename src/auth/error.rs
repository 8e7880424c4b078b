// Authentication and authorization error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::auth::models::Role;
use crate::error::{validation_details, ErrorResponse};

/// Fixed client message for every access-token failure, whatever the cause
pub const UNAUTHENTICATED_MESSAGE: &str = "Authentication required";

/// Authentication and authorization error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // Authentication errors
    /// Missing, malformed, badly signed or expired access token
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Refresh token unknown, expired or reused
    #[error("Invalid refresh token")]
    InvalidToken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("User {0} not found")]
    UserNotFound(i32),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request validation failed")]
    ValidationErrors(#[from] validator::ValidationErrors),

    #[error("Password hashing error")]
    PasswordHash,

    #[error("Token generation error: {0}")]
    TokenGeneration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Authorization errors
    /// User lacks required permissions for the operation
    #[error("Insufficient permissions: required role '{required}', but user has role '{actual}'")]
    Forbidden { required: Role, actual: Role },

    /// Misconfigured gate or missing server setting
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated
            | AuthError::InvalidToken
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::EmailAlreadyExists => StatusCode::CONFLICT,
            AuthError::UserNotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Validation(_) | AuthError::ValidationErrors(_) => StatusCode::BAD_REQUEST,
            AuthError::PasswordHash
            | AuthError::TokenGeneration(_)
            | AuthError::Storage(_)
            | AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "UNAUTHENTICATED",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            AuthError::UserNotFound(_) => "NOT_FOUND",
            AuthError::Validation(_) | AuthError::ValidationErrors(_) => "VALIDATION_ERROR",
            AuthError::Forbidden { .. } => "FORBIDDEN",
            AuthError::PasswordHash
            | AuthError::TokenGeneration(_)
            | AuthError::Storage(_)
            | AuthError::Config(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to send to clients (no sensitive data)
    pub fn error_message(&self) -> String {
        match self {
            AuthError::Unauthenticated => UNAUTHENTICATED_MESSAGE.to_string(),
            AuthError::InvalidToken => "Session expired, please sign in again".to_string(),
            AuthError::Forbidden { required, .. } => {
                format!("Insufficient permissions: required role '{}'", required)
            }
            AuthError::Validation(msg) => msg.clone(),
            AuthError::PasswordHash
            | AuthError::TokenGeneration(_)
            | AuthError::Storage(_)
            | AuthError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::InvalidToken => warn!("Rejected refresh token"),
            AuthError::Forbidden { required, actual } => {
                warn!("Authorization failed: required role '{}', user has role '{}'", required, actual)
            }
            AuthError::PasswordHash
            | AuthError::TokenGeneration(_)
            | AuthError::Storage(_)
            | AuthError::Config(_) => error!("Auth internal error: {}", self),
            _ => {}
        }

        let mut body = ErrorResponse::new(self.error_code(), self.error_message());
        if let AuthError::ValidationErrors(errors) = &self {
            body = body.with_details(validation_details(errors));
        }
        body.into_response_with(self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Forbidden { required: Role::Moderator, actual: Role::Client }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AuthError::EmailAlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::Storage("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = AuthError::Storage("connection refused at 10.0.0.3".into());
        assert_eq!(err.error_message(), "Internal server error");
    }

    #[test]
    fn test_forbidden_message_hides_actual_role() {
        let err = AuthError::Forbidden { required: Role::SuperAdmin, actual: Role::Moderator };
        let message = err.error_message();
        assert!(message.contains("super_admin"));
        assert!(!message.contains("moderator"));
    }
}
