//! API handlers for the lending REST endpoints

pub mod books;
pub mod borrowings;
pub mod health;
pub mod openapi;
pub mod reservations;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

use crate::{error::AppError, models::Pagination, models::user::UserClaims, AppState};

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = UserClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

/// JSON body that has passed its `validator` rules
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

/// Success envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: None,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::data(data)
        }
    }

    pub fn page(data: T, pagination: Pagination) -> Self {
        Self {
            pagination: Some(pagination),
            ..Self::data(data)
        }
    }
}

/// Parse an optional `status` query value
pub(crate) fn parse_status<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.filter(|s| !s.is_empty())
        .map(str::parse::<T>)
        .transpose()
        .map_err(AppError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BorrowingStatus, ReservationStatus};

    #[test]
    fn status_filter_parsing() {
        assert_eq!(parse_status::<BorrowingStatus>(None).unwrap(), None);
        assert_eq!(parse_status::<BorrowingStatus>(Some("")).unwrap(), None);
        assert_eq!(
            parse_status::<BorrowingStatus>(Some("Overdue")).unwrap(),
            Some(BorrowingStatus::Overdue)
        );
        assert!(matches!(
            parse_status::<ReservationStatus>(Some("waiting")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn envelope_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::data(3)).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 3 }));

        let json = serde_json::to_value(ApiResponse::with_message("Book reserved", "x")).unwrap();
        assert_eq!(json["message"], "Book reserved");
    }
}
