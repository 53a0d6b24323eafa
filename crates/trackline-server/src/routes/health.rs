use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: liveness check.
///
/// Returns `200 OK` when both the buffer and DuckDB answer a ping, and
/// `503 Service Unavailable` with the failing component marked otherwise.
///
/// Response shape:
/// ```json
/// { "status": "ok", "version": "0.1.0", "buffer": "ok", "database": "ok" }
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let buffer_ok = match state.buffer.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Health check: buffer unreachable");
            false
        }
    };
    let database_ok = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Health check: DuckDB unreachable");
            false
        }
    };

    let label = |ok: bool| if ok { "ok" } else { "unreachable" };
    let (status, overall) = if buffer_ok && database_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": overall,
            "version": env!("CARGO_PKG_VERSION"),
            "buffer": label(buffer_ok),
            "database": label(database_ok),
        })),
    )
}
