pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod parsers;
pub mod routes;
pub mod services;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted scan upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state passed to all Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: config::AppConfig,
}

/// Build the full API router. Shared between the server binary and the
/// integration tests.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/systems", get(routes::systems::list))
        .route("/systems/{id}", get(routes::systems::get_by_id))
        .route("/systems/{id}/assets", get(routes::systems::list_assets))
        .route(
            "/imports",
            post(routes::imports::upload).get(routes::imports::list),
        )
        .route("/imports/{id}", get(routes::imports::get_job))
        .route("/imports/{id}/findings", get(routes::imports::job_findings))
        .route(
            "/findings/{id}/disposition",
            patch(routes::findings::update_disposition),
        )
        .route(
            "/remediation-plans/generate",
            post(routes::remediation::generate),
        )
        .route("/remediation-plans", get(routes::remediation::list))
        .route("/remediation-plans/{id}", get(routes::remediation::get_plan));

    Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
