use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the Axum `Router`: the scrape route plus request timing.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics::get_metrics))
        .with_state(state)
        .layer(axum_mw::from_fn(timing::timing_middleware))
}
