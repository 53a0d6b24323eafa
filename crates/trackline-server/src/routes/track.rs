use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use trackline_core::event::TrackPayload;

use crate::{
    client_ip::{resolve_client_ip, MaybeConnectInfo},
    error::AppError,
    recorder::RequestMeta,
    state::AppState,
};

/// `POST /api/track`: record one tracking event into today's buffer.
///
/// No auth: the endpoint is called from public pages. The client address
/// comes from proxy headers or the TCP peer (see [`resolve_client_ip`]); the
/// user agent is hashed before it is stored.
///
/// ## Response
/// `200 OK` with `{ "message", "data": { "timestamp", "session_id" } }`.
#[tracing::instrument(skip(state, connect_info, headers, payload))]
pub async fn track(
    State(state): State<Arc<AppState>>,
    connect_info: MaybeConnectInfo,
    headers: HeaderMap,
    Json(payload): Json<TrackPayload>,
) -> Result<impl IntoResponse, AppError> {
    let meta = RequestMeta {
        ip: resolve_client_ip(&headers, connect_info.0),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
    };

    let outcome = state.recorder.record(payload, &meta).await?;

    Ok(Json(json!({
        "message": "Event tracked",
        "data": {
            "timestamp": outcome.timestamp,
            "session_id": outcome.session_id,
        }
    })))
}
