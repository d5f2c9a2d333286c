//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, borrowings, health, reservations};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lending API",
        version = "1.0.0",
        description = "Library lending REST API: borrowings, reservations and fines",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Borrowings
        borrowings::create_borrowing,
        borrowings::get_borrowing,
        borrowings::return_book,
        borrowings::renew_borrowing,
        borrowings::list_overdue,
        borrowings::mark_overdue,
        borrowings::mark_lost,
        borrowings::pay_fine,
        borrowings::list_user_borrowings,
        borrowings::get_user_fines,
        borrowings::get_stats,
        // Reservations
        reservations::create_reservation,
        reservations::get_reservation,
        reservations::cancel_reservation,
        reservations::fulfill_reservation,
        reservations::fulfill_and_borrow,
        reservations::list_user_reservations,
        reservations::list_book_reservations,
        reservations::get_queue_position,
        reservations::list_expired,
        reservations::get_stats,
    ),
    components(
        schemas(
            // Books
            crate::models::book::Book,
            crate::models::book::BookDetails,
            crate::models::book::BookStatus,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Borrowings
            crate::models::borrowing::Borrowing,
            crate::models::borrowing::BorrowingDetails,
            crate::models::borrowing::BorrowingStatus,
            crate::models::borrowing::BorrowingStats,
            crate::models::borrowing::CreateBorrowing,
            crate::models::borrowing::ReturnBorrowing,
            crate::models::fine::UserFines,
            // Reservations
            crate::models::reservation::Reservation,
            crate::models::reservation::ReservationDetails,
            crate::models::reservation::ReservationStatus,
            crate::models::reservation::ReservationStats,
            crate::models::reservation::CreateReservation,
            crate::models::reservation::FulfilledLoan,
            reservations::QueuePosition,
            // Paging
            crate::models::Pagination,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
            crate::error::FieldError,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Catalog and copy counts"),
        (name = "borrowings", description = "Loans, renewals, returns and fines"),
        (name = "reservations", description = "Per-book waiting queues")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
