//! API module: routes for the execution service.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

/// Create the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/detailed", get(handlers::health_detailed))
        .route("/exec", post(handlers::exec))
        .route("/upload", post(handlers::upload))
        .route("/download/{session_id}/{file_id}", get(handlers::download))
        .with_state(state)
}
