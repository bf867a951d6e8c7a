use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Daemon status
        .route("/status", get(handlers::get_status))
        // Conversation control
        .route("/mic/on", post(handlers::mic_on))
        .route("/mic/off", post(handlers::mic_off))
        .route("/interrupt", post(handlers::interrupt))
        .route("/reset", post(handlers::reset))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
