pub mod cache;
pub mod config;
pub mod crawler;
pub mod events;
pub mod jobs;
pub mod models;
pub mod normalize;
pub mod queue;
pub mod server;
pub mod store;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::jobs::JobManager;

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub job_manager: Arc<JobManager>,
}

pub fn build_app(state: AppState) -> Router {
    // CORS layer — permissive for the internal service
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that require HMAC authentication
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/crawl",
            post(server::routes::submit_crawl).get(server::routes::active_jobs),
        )
        .route("/api/v1/crawl/:job_id", get(server::routes::job_state))
        .route(
            "/api/v1/crawl/:job_id/download",
            get(server::routes::download_artifact),
        )
        .route(
            "/api/v1/crawl/:job_id/events",
            get(server::routes::job_events),
        )
        .route(
            "/api/v1/crawl/:job_id/cancel",
            post(server::routes::cancel_job),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            server::auth::verify_hmac,
        ));

    // Public routes (no auth required)
    let public_routes = Router::new().route("/api/v1/health", get(server::routes::health));

    // Combine all routes
    Router::new()
        .merge(authenticated_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
