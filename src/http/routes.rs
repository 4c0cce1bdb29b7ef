use super::handlers;
use super::socket;
use super::state::AppState;
use axum::{http::Method, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        // Health check
        .route("/api/health", get(handlers::health_check))
        // Live relay queries
        .route("/api/sessions", get(handlers::list_sessions))
        .route(
            "/api/sessions/:connection_id/transcript",
            get(handlers::get_session_transcript),
        )
        // Client audio/transcript channel
        .route("/ws", get(socket::ws_handler))
        .layer(cors)
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
