pub mod metrics;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::error::RenderError;

// ─── Unified error type ──────────────────────────────────────────

/// Errors that reach an HTTP response. Upstream and probe failures never
/// get here; they degrade to stale gauges instead.
#[derive(Debug)]
pub enum AppError {
    Render(RenderError),
}

impl From<RenderError> for AppError {
    fn from(e: RenderError) -> Self {
        Self::Render(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Render(e) => {
                error!(error = %e, "failed to render metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
