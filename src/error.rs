//! Error types for the lending server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Numeric error codes returned to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    NotAvailable = 5,
    Duplicate = 6,
    AlreadyBorrowed = 7,
    MaxBorrowsReached = 8,
    OutstandingFines = 9,
    InvalidState = 10,
    BadValue = 11,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The actor neither owns the resource nor holds an elevated role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid request fields")]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Book {0} has no copy available")]
    NotAvailable(i32),

    #[error("User already has book {0} borrowed")]
    DuplicateBorrow(i32),

    #[error("User already has a pending reservation for book {0}")]
    DuplicateReservation(i32),

    #[error("Book {0} is currently borrowed by this user")]
    AlreadyBorrowed(i32),

    #[error("Borrowing limit reached ({current}/{limit})")]
    LimitExceeded { current: i64, limit: i64 },

    #[error("Outstanding fines of {0} must be paid before borrowing")]
    OutstandingFines(Decimal),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Field-level validation failure
#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Error response body
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: u32,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

fn field_errors(errors: &validator::ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| FieldError {
                field: field.to_string(),
                message: err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string()),
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl AppError {
    fn parts(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchData),
            AppError::Validation(_) | AppError::InvalidFields(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue)
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::Duplicate),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
            AppError::NotAvailable(_) => (StatusCode::CONFLICT, ErrorCode::NotAvailable),
            AppError::DuplicateBorrow(_) | AppError::DuplicateReservation(_) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate)
            }
            AppError::AlreadyBorrowed(_) => (StatusCode::CONFLICT, ErrorCode::AlreadyBorrowed),
            AppError::LimitExceeded { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::MaxBorrowsReached)
            }
            AppError::OutstandingFines(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::OutstandingFines)
            }
            AppError::InvalidState(_) => (StatusCode::CONFLICT, ErrorCode::InvalidState),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::InvalidFields(_) => "Validation failed".to_string(),
            other => other.to_string(),
        };

        let errors = match &self {
            AppError::InvalidFields(errs) => Some(field_errors(errs)),
            _ => None,
        };

        let body = Json(ErrorResponse {
            success: false,
            code: code as u32,
            error: format!("{:?}", code),
            message,
            errors,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn domain_errors_map_to_statuses() {
        let cases = [
            (AppError::NotFound("Book 1 not found".into()), StatusCode::NOT_FOUND),
            (AppError::NotAvailable(1), StatusCode::CONFLICT),
            (AppError::DuplicateBorrow(1), StatusCode::CONFLICT),
            (AppError::DuplicateReservation(1), StatusCode::CONFLICT),
            (
                AppError::LimitExceeded { current: 5, limit: 5 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::OutstandingFines(Decimal::new(250, 2)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::Forbidden("not yours".into()), StatusCode::FORBIDDEN),
            (AppError::InvalidState("returned".into()), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            let (status, body) = body_json(err).await;
            assert_eq!(status, expected);
            assert_eq!(body["success"], false);
            assert!(body["message"].is_string());
            assert!(body.get("errors").is_none());
        }
    }

    #[tokio::test]
    async fn database_errors_are_not_leaked() {
        let (status, body) = body_json(AppError::Database(sqlx::Error::RowNotFound)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Database error");
        assert_eq!(body["error"], "DbFailure");
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 1, message = "Title is required"))]
        title: String,
    }

    #[tokio::test]
    async fn validation_errors_carry_field_list() {
        let errors = Sample { title: String::new() }.validate().unwrap_err();
        let (status, body) = body_json(errors.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "title");
        assert_eq!(body["errors"][0]["message"], "Title is required");
    }
}
