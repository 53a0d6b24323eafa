use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::parse_date_param;
use super::stats::DateQuery;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct RollupRequest {
    pub date: Option<String>,
}

/// Guard for history reads and `/api/admin/*`: requires
/// `Authorization: Bearer <token>` when an admin token is configured.
/// Without one the routes are open.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if presented == Some(expected) {
        next.run(request).await
    } else {
        AppError::Unauthorized.into_response()
    }
}

/// `POST /api/admin/rollup`: run the rollup for one date synchronously.
///
/// The date defaults to yesterday in the server timezone, also when no body
/// is sent at all. Concurrent calls for the same date wait for each other.
#[tracing::instrument(skip(state))]
pub async fn trigger_rollup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RollupRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let today = state.today();
    let yesterday = today.pred_opt().unwrap_or(today);
    let requested = body.and_then(|Json(body)| body.date);
    let date = parse_date_param(requested.as_deref(), "date", yesterday)?;

    let outcome = state.rollup.run(date).await?;
    Ok(Json(json!({
        "message": "Rollup finished",
        "data": outcome,
    })))
}

/// `GET /api/admin/buffer`: what is still buffered for a date.
#[tracing::instrument(skip(state))]
pub async fn get_buffer_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let summary = state
        .live
        .buffer_summary(Some(date))
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": summary })))
}
