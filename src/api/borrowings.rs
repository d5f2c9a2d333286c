//! Borrowing endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::{parse_status, ApiResponse, AuthenticatedUser, ValidatedJson};
use crate::{
    error::AppResult,
    models::{
        borrowing::{BorrowingDetails, BorrowingStats, BorrowingStatus, CreateBorrowing, ReturnBorrowing},
        fine::UserFines,
        ListQuery, Pagination,
    },
    AppState,
};

/// Borrow a book
#[utoipa::path(
    post,
    path = "/borrowings",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    request_body = CreateBorrowing,
    responses(
        (status = 201, description = "Book borrowed", body = BorrowingDetails),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Only staff may lend on behalf of another user"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "No copy available or already borrowed"),
        (status = 422, description = "Borrowing limit reached or fines outstanding")
    )
)]
pub async fn create_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    ValidatedJson(request): ValidatedJson<CreateBorrowing>,
) -> AppResult<(StatusCode, Json<ApiResponse<BorrowingDetails>>)> {
    let user_id = match request.user_id {
        Some(user_id) if user_id != claims.user_id => {
            claims.require_staff()?;
            user_id
        }
        _ => claims.user_id,
    };

    let borrowing = state
        .services
        .borrowings
        .create_borrowing(user_id, request.book_id, request.due_date, claims.user_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Book borrowed successfully", borrowing)),
    ))
}

/// Get one borrowing
#[utoipa::path(
    get,
    path = "/borrowings/{id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Borrowing details", body = BorrowingDetails),
        (status = 403, description = "Not your borrowing"),
        (status = 404, description = "Borrowing not found")
    )
)]
pub async fn get_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    let borrowing = state.services.borrowings.get(id).await?;
    claims.require_self_or_staff(borrowing.borrowing.user_id)?;
    Ok(Json(ApiResponse::data(borrowing)))
}

/// Check a copy back in
#[utoipa::path(
    put,
    path = "/borrowings/{id}/return",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    request_body = ReturnBorrowing,
    responses(
        (status = 200, description = "Book returned", body = BorrowingDetails),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "Borrowing already closed")
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    ValidatedJson(request): ValidatedJson<ReturnBorrowing>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowing = state
        .services
        .borrowings
        .return_book(id, claims.user_id, request.notes)
        .await?;
    Ok(Json(ApiResponse::with_message("Book returned successfully", borrowing)))
}

/// Renew one of your own borrowings
#[utoipa::path(
    post,
    path = "/borrowings/{id}/renew",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Borrowing renewed", body = BorrowingDetails),
        (status = 403, description = "Not your borrowing"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "Borrowing cannot be renewed")
    )
)]
pub async fn renew_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    let borrowing = state.services.borrowings.renew(id, claims.user_id).await?;
    Ok(Json(ApiResponse::with_message("Book renewed successfully", borrowing)))
}

/// Active borrowings past their due date
#[utoipa::path(
    get,
    path = "/borrowings/overdue",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue borrowings", body = Vec<BorrowingDetails>),
        (status = 403, description = "Staff only")
    )
)]
pub async fn list_overdue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<Vec<BorrowingDetails>>>> {
    claims.require_staff()?;

    let borrowings = state.services.borrowings.list_overdue().await?;
    Ok(Json(ApiResponse::data(borrowings)))
}

/// Flag a borrowing overdue and record its fine
#[utoipa::path(
    put,
    path = "/borrowings/{id}/overdue",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Borrowing marked overdue", body = BorrowingDetails),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "Borrowing already closed")
    )
)]
pub async fn mark_overdue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowing = state.services.borrowings.mark_overdue(id).await?;
    Ok(Json(ApiResponse::data(borrowing)))
}

/// Write a borrowed copy off as lost
#[utoipa::path(
    put,
    path = "/borrowings/{id}/lost",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Borrowing marked lost", body = BorrowingDetails),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "Borrowing already closed")
    )
)]
pub async fn mark_lost(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowing = state.services.borrowings.mark_lost(id).await?;
    Ok(Json(ApiResponse::data(borrowing)))
}

/// Record payment of a borrowing's fine
#[utoipa::path(
    put,
    path = "/borrowings/{id}/pay-fine",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Fine paid", body = BorrowingDetails),
        (status = 403, description = "Staff only"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "Loan still open or no unpaid fine")
    )
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowing = state.services.borrowings.pay_fine(id).await?;
    Ok(Json(ApiResponse::with_message("Fine paid", borrowing)))
}

/// A user's borrowings, newest first
#[utoipa::path(
    get,
    path = "/borrowings/user/{user_id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("user_id" = i32, Path, description = "User ID"), ListQuery),
    responses(
        (status = 200, description = "Page of borrowings", body = Vec<BorrowingDetails>),
        (status = 400, description = "Invalid status filter"),
        (status = 403, description = "Not your borrowings")
    )
)]
pub async fn list_user_borrowings(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<BorrowingDetails>>>> {
    claims.require_self_or_staff(user_id)?;

    let status = parse_status::<BorrowingStatus>(query.status.as_deref())?;
    let (borrowings, total) = state
        .services
        .borrowings
        .list_for_user(user_id, status, query.limit(), query.offset())
        .await?;
    Ok(Json(ApiResponse::page(borrowings, Pagination::new(&query, total))))
}

/// Outstanding fines of a user
#[utoipa::path(
    get,
    path = "/borrowings/user/{user_id}/fines",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("user_id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Fine summary", body = UserFines),
        (status = 403, description = "Not your fines")
    )
)]
pub async fn get_user_fines(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<ApiResponse<UserFines>>> {
    claims.require_self_or_staff(user_id)?;

    let fines = state.services.borrowings.user_fines(user_id).await?;
    Ok(Json(ApiResponse::data(fines)))
}

/// Borrowing counters
#[utoipa::path(
    get,
    path = "/borrowings/stats",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Borrowing statistics", body = BorrowingStats),
        (status = 403, description = "Staff only")
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<BorrowingStats>>> {
    claims.require_staff()?;

    let stats = state.services.borrowings.stats().await?;
    Ok(Json(ApiResponse::data(stats)))
}
