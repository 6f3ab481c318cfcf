use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

use crate::metrics::registry::CONTENT_TYPE;
use crate::AppState;

use super::AppError;

// ─── GET /metrics ────────────────────────────────────────────────
/// Recomputes every gauge, then returns the whole registry.
/// Always 200 unless rendering itself fails.
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let body = state.scraper.scrape().await?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body))
}
