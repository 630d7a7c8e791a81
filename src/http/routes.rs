use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Capture control
        .route("/replay/start", post(handlers::start_capture))
        .route("/replay/stop", post(handlers::stop_capture))
        // Buffer configuration and queries
        .route("/replay/status", get(handlers::get_status))
        .route("/replay/capacity", put(handlers::set_capacity))
        .route("/replay/clear", post(handlers::clear_buffer))
        .route("/replay/events", get(handlers::replay_events))
        // Export
        .route("/replay/save", post(handlers::save_replay))
        .route("/replay/save/disk", post(handlers::save_replay_to_disk))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
