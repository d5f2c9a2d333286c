//! Lending Server
//!
//! REST API for borrowing, reserving and returning library books.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use lending_server::{
    api,
    config::{AppConfig, LoggingConfig},
    repository::Repository,
    services::{sweeper, Services},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Starting Lending Server v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let repository = Repository::new(pool);
    let services = Services::new(repository, config.lending.clone(), Arc::new(mockable::DefaultClock));
    let _sweeper = sweeper::spawn(services.clone());

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console output in the configured format, plus an optional daily log file
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lending_server={},tower_http=debug", logging.level).into());

    let console = match logging.format.as_str() {
        "json" => fmt::layer().json().boxed(),
        _ => fmt::layer().boxed(),
    };

    let (file, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "lending-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    guard
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Books
        .route("/books", get(api::books::list_books).post(api::books::create_book))
        .route(
            "/books/:id",
            get(api::books::get_book)
                .put(api::books::update_book)
                .delete(api::books::delete_book),
        )
        // Borrowings
        .route("/borrowings", post(api::borrowings::create_borrowing))
        .route("/borrowings/overdue", get(api::borrowings::list_overdue))
        .route("/borrowings/stats", get(api::borrowings::get_stats))
        .route("/borrowings/user/:user_id", get(api::borrowings::list_user_borrowings))
        .route("/borrowings/user/:user_id/fines", get(api::borrowings::get_user_fines))
        .route("/borrowings/:id", get(api::borrowings::get_borrowing))
        .route("/borrowings/:id/return", put(api::borrowings::return_book))
        .route("/borrowings/:id/renew", post(api::borrowings::renew_borrowing))
        .route("/borrowings/:id/overdue", put(api::borrowings::mark_overdue))
        .route("/borrowings/:id/lost", put(api::borrowings::mark_lost))
        .route("/borrowings/:id/pay-fine", put(api::borrowings::pay_fine))
        // Reservations
        .route("/reservations", post(api::reservations::create_reservation))
        .route("/reservations/expired", get(api::reservations::list_expired))
        .route("/reservations/stats", get(api::reservations::get_stats))
        .route("/reservations/user/:user_id", get(api::reservations::list_user_reservations))
        .route("/reservations/book/:book_id", get(api::reservations::list_book_reservations))
        .route("/reservations/book/:book_id/position", get(api::reservations::get_queue_position))
        .route("/reservations/:id", get(api::reservations::get_reservation))
        .route("/reservations/:id/cancel", put(api::reservations::cancel_reservation))
        .route("/reservations/:id/fulfill", put(api::reservations::fulfill_reservation))
        .route(
            "/reservations/:id/fulfill-and-borrow",
            post(api::reservations::fulfill_and_borrow),
        )
        .with_state(state);

    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
}
