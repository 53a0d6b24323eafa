use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{error::AppError, state::AppState};

/// `GET /api/analytics/realtime`: online users and today's live counters.
#[tracing::instrument(skip(state))]
pub async fn get_realtime(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.live.snapshot().await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": snapshot })))
}
