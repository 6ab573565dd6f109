use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app_state::AppState;

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/snapshot", get(handlers::snapshot))
        .route("/stream", get(handlers::stream))
        .with_state(state)
}
