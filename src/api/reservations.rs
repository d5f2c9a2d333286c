//! Reservation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{parse_status, ApiResponse, AuthenticatedUser, ValidatedJson};
use crate::{
    error::AppResult,
    models::{
        reservation::{CreateReservation, FulfilledLoan, ReservationDetails, ReservationStats, ReservationStatus},
        ListQuery, Pagination,
    },
    AppState,
};

/// Status filter for a book's queue
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct BookQueueQuery {
    /// Defaults to `pending`
    pub status: Option<String>,
}

/// The caller's place in a book's queue
#[derive(Debug, Serialize, ToSchema)]
pub struct QueuePosition {
    pub book_id: i32,
    /// `null` when the caller is not waiting for the book
    pub position: Option<i64>,
}

/// Join the queue for a book
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = CreateReservation,
    responses(
        (status = 201, description = "Reservation created", body = ReservationDetails),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already reserved or already borrowed")
    )
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    ValidatedJson(request): ValidatedJson<CreateReservation>,
) -> AppResult<(StatusCode, Json<ApiResponse<ReservationDetails>>)> {
    let reservation = state
        .services
        .reservations
        .reserve(claims.user_id, request.book_id, request.notes)
        .await?;

    let message = match reservation.position {
        Some(position) => format!("Book reserved successfully, position {} in queue", position),
        None => "Book reserved successfully".to_string(),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(message, reservation))))
}

/// Get one reservation
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation details", body = ReservationDetails),
        (status = 403, description = "Not your reservation"),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<ReservationDetails>>> {
    let reservation = state.services.reservations.get(id).await?;
    claims.require_self_or_staff(reservation.reservation.user_id)?;
    Ok(Json(ApiResponse::data(reservation)))
}

/// Cancel one of your own reservations
#[utoipa::path(
    put,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation cancelled", body = ReservationDetails),
        (status = 403, description = "Not your reservation"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation is not pending")
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<ReservationDetails>>> {
    let reservation = state.services.reservations.cancel(id, claims.user_id).await?;
    Ok(Json(ApiResponse::with_message("Reservation cancelled successfully", reservation)))
}

/// Mark a reservation fulfilled
#[utoipa::path(
    put,
    path = "/reservations/{id}/fulfill",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation fulfilled", body = ReservationDetails),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation not pending or no copy available")
    )
)]
pub async fn fulfill_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<ReservationDetails>>> {
    claims.require_staff()?;

    let reservation = state.services.reservations.fulfill(id, claims.user_id).await?;
    Ok(Json(ApiResponse::with_message("Reservation fulfilled successfully", reservation)))
}

/// Fulfill a reservation and lend the copy to its owner
#[utoipa::path(
    post,
    path = "/reservations/{id}/fulfill-and-borrow",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 201, description = "Reservation fulfilled and book lent", body = FulfilledLoan),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation not pending or no copy available"),
        (status = 422, description = "Owner may not borrow")
    )
)]
pub async fn fulfill_and_borrow(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<(StatusCode, Json<ApiResponse<FulfilledLoan>>)> {
    claims.require_staff()?;

    let loan = state.services.reservations.fulfill_and_borrow(id, claims.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Reservation fulfilled and book borrowed", loan)),
    ))
}

/// A user's reservations
#[utoipa::path(
    get,
    path = "/reservations/user/{user_id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("user_id" = i32, Path, description = "User ID"), ListQuery),
    responses(
        (status = 200, description = "Page of reservations", body = Vec<ReservationDetails>),
        (status = 400, description = "Invalid status filter"),
        (status = 403, description = "Not your reservations")
    )
)]
pub async fn list_user_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<ReservationDetails>>>> {
    claims.require_self_or_staff(user_id)?;

    let status = parse_status::<ReservationStatus>(query.status.as_deref())?;
    let (reservations, total) = state
        .services
        .reservations
        .list_for_user(user_id, status, query.limit(), query.offset())
        .await?;
    Ok(Json(ApiResponse::page(reservations, Pagination::new(&query, total))))
}

/// A book's queue
#[utoipa::path(
    get,
    path = "/reservations/book/{book_id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("book_id" = i32, Path, description = "Book ID"), BookQueueQuery),
    responses(
        (status = 200, description = "Reservations in queue order", body = Vec<ReservationDetails>),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn list_book_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
    Query(query): Query<BookQueueQuery>,
) -> AppResult<Json<ApiResponse<Vec<ReservationDetails>>>> {
    claims.require_staff()?;

    let status = parse_status::<ReservationStatus>(query.status.as_deref())?.unwrap_or(ReservationStatus::Pending);
    let reservations = state.services.reservations.list_for_book(book_id, status).await?;
    Ok(Json(ApiResponse::data(reservations)))
}

/// The caller's position in a book's queue
#[utoipa::path(
    get,
    path = "/reservations/book/{book_id}/position",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("book_id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Queue position", body = QueuePosition)
    )
)]
pub async fn get_queue_position(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<ApiResponse<QueuePosition>>> {
    let position = state
        .services
        .reservations
        .get_user_position(claims.user_id, book_id)
        .await?;
    Ok(Json(ApiResponse::data(QueuePosition { book_id, position })))
}

/// Pending reservations past their expiry date
#[utoipa::path(
    get,
    path = "/reservations/expired",
    tag = "reservations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Stale reservations", body = Vec<ReservationDetails>),
        (status = 403, description = "Staff only")
    )
)]
pub async fn list_expired(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<Vec<ReservationDetails>>>> {
    claims.require_staff()?;

    let reservations = state.services.reservations.list_expired().await?;
    Ok(Json(ApiResponse::data(reservations)))
}

/// Reservation counters
#[utoipa::path(
    get,
    path = "/reservations/stats",
    tag = "reservations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reservation statistics", body = ReservationStats),
        (status = 403, description = "Staff only")
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<ReservationStats>>> {
    claims.require_staff()?;

    let stats = state.services.reservations.stats().await?;
    Ok(Json(ApiResponse::data(stats)))
}
