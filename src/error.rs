// Shared error response format for the Storefront API
// Every module error renders through ErrorResponse so clients see one shape

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Consistent error response structure
///
/// Provides both machine-readable (error_code) and human-readable (message)
/// information. Fields follow snake_case naming convention.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "UNAUTHENTICATED", "INVALID_TRANSITION")
    pub error_code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (e.g., field-level validation errors)
    /// Omitted from JSON when None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// ISO 8601 timestamp of when the error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_code: &str, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.to_string(),
            message: message.into(),
            details: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Pair the body with a status code and build the HTTP response
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Render validator errors as the `details` payload of a 400 response
pub fn validation_details(errors: &validator::ValidationErrors) -> serde_json::Value {
    serde_json::to_value(errors).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_omits_empty_details() {
        let body = ErrorResponse::new("NOT_FOUND", "Order not found");
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["error_code"], "NOT_FOUND");
        assert_eq!(json["message"], "Order not found");
        assert!(json.get("details").is_none());
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn test_error_response_status_is_preserved() {
        let response = ErrorResponse::new("CONFLICT", "taken")
            .with_details(serde_json::json!({"field": "email"}))
            .into_response_with(StatusCode::CONFLICT);

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
