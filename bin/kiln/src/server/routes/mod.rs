//! Router assembly.

pub mod health;
pub mod inference;
pub mod models;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::state::AppState;

/// Build the complete application router.
pub fn build(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(health::router())
        .merge(models::router())
        .merge(inference::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
