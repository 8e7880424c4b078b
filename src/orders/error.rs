use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::{validation_details, ErrorResponse};
use crate::orders::models::OrderStatus;

/// Error types for order operations
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Compare-and-set on the status failed; nothing was changed
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Order not found")]
    NotFound,

    #[error("Product {0} not found")]
    ProductNotFound(i32),

    #[error("Invoice is not available for an order in status {status}")]
    InvoiceUnavailable { status: OrderStatus },

    #[error("You do not have permission to access this order")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request validation failed")]
    ValidationErrors(#[from] validator::ValidationErrors),

    /// `transient` marks failures worth retrying (connection loss, pool timeout)
    #[error("Database error: {message}")]
    Storage { message: String, transient: bool },
}

impl OrderError {
    pub fn storage(message: impl Into<String>) -> Self {
        OrderError::Storage {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, OrderError::Storage { transient: true, .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::InvalidTransition { .. }
            | OrderError::InsufficientStock { .. }
            | OrderError::InvoiceUnavailable { .. } => StatusCode::CONFLICT,
            OrderError::NotFound | OrderError::ProductNotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Forbidden => StatusCode::FORBIDDEN,
            OrderError::Validation(_) | OrderError::ValidationErrors(_) => StatusCode::BAD_REQUEST,
            OrderError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrderError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            OrderError::NotFound => "NOT_FOUND",
            OrderError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            OrderError::InvoiceUnavailable { .. } => "INVOICE_UNAVAILABLE",
            OrderError::Forbidden => "FORBIDDEN",
            OrderError::Validation(_) | OrderError::ValidationErrors(_) => "VALIDATION_ERROR",
            OrderError::Storage { .. } => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            OrderError::InvalidTransition { from, to } => Some(serde_json::json!({
                "from": from,
                "to": to,
            })),
            OrderError::InsufficientStock {
                product_id,
                requested,
                available,
            } => Some(serde_json::json!({
                "product_id": product_id,
                "requested": requested,
                "available": available,
            })),
            OrderError::ValidationErrors(errors) => Some(validation_details(errors)),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        let transient = matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
        );
        OrderError::Storage {
            message: err.to_string(),
            transient,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let message = match &self {
            OrderError::Storage { message, .. } => {
                tracing::error!("Order storage error: {}", message);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ErrorResponse::new(self.error_code(), message);
        if let Some(details) = self.details() {
            body = body.with_details(details);
        }
        body.into_response_with(self.status_code())
    }
}
