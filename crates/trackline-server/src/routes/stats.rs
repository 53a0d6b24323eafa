use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Days;
use serde::Deserialize;
use serde_json::json;

use trackline_duckdb::queries::EventQuery;

use super::parse_date_param;
use crate::{error::AppError, state::AppState};

/// Longest span `GET /api/analytics/range` serves in one response.
const MAX_RANGE_DAYS: i64 = 366;
const DEFAULT_TOP_PAGES: i64 = 10;
const DEFAULT_IP_LIMIT: i64 = 100;
const DEFAULT_REFERER_LIMIT: i64 = 50;
const DEFAULT_USER_AGENT_LIMIT: i64 = 50;
const MAX_USER_AGENT_LIMIT: i64 = 500;
const DEFAULT_EVENTS_LIMIT: i64 = 50;
const MAX_EVENTS_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitedDateQuery {
    pub date: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub date: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub path: Option<String>,
    pub event_type: Option<String>,
    pub ip_address: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `GET /api/analytics/daily`: stored aggregate for one date (default today).
#[tracing::instrument(skip(state))]
pub async fn get_daily(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let aggregate = state
        .db
        .get_daily_stats(date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No stats for {date}")))?;
    Ok(Json(json!({ "data": aggregate })))
}

/// `GET /api/analytics/range`: stored aggregates between two dates,
/// inclusive. Defaults to the last seven days.
#[tracing::instrument(skip(state))]
pub async fn get_range(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let today = state.today();
    let end_date = parse_date_param(query.end_date.as_deref(), "end_date", today)?;
    let default_start = end_date.checked_sub_days(Days::new(6)).unwrap_or(end_date);
    let start_date = parse_date_param(query.start_date.as_deref(), "start_date", default_start)?;

    if start_date > end_date {
        return Err(AppError::BadRequest(
            "start_date must not be after end_date".to_string(),
        ));
    }
    if (end_date - start_date).num_days() >= MAX_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "date range must not exceed {MAX_RANGE_DAYS} days"
        )));
    }

    let rows = state.db.get_stats_range(start_date, end_date).await?;
    Ok(Json(json!({
        "data": rows,
        "start_date": start_date,
        "end_date": end_date,
    })))
}

/// `GET /api/analytics/top-pages`: heatmap rows ordered by views, then clicks.
#[tracing::instrument(skip(state))]
pub async fn get_top_pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitedDateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let limit = query.limit.unwrap_or(DEFAULT_TOP_PAGES).clamp(1, 100);
    let rows = state.db.get_top_pages(date, limit).await?;
    Ok(Json(json!({ "data": rows })))
}

/// `GET /api/analytics/events`: paged raw event log for one date.
#[tracing::instrument(skip(state))]
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    if !(1..=MAX_EVENTS_LIMIT).contains(&limit) {
        return Err(AppError::Validation {
            field: "limit",
            message: format!("must be between 1 and {MAX_EVENTS_LIMIT}"),
        });
    }
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::Validation {
            field: "page",
            message: "must be at least 1".to_string(),
        });
    }

    let result = state
        .db
        .list_tracking_events(&EventQuery {
            date,
            page,
            limit,
            path: non_empty(query.path),
            event_type: non_empty(query.event_type),
            ip_address: non_empty(query.ip_address),
        })
        .await?;

    let total_pages = (result.total + limit - 1) / limit;
    Ok(Json(json!({
        "data": result.events,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": result.total,
            "total_pages": total_pages,
        }
    })))
}

/// `GET /api/analytics/ips`: requests per client address.
#[tracing::instrument(skip(state))]
pub async fn get_ips(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitedDateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let limit = query.limit.unwrap_or(DEFAULT_IP_LIMIT).clamp(1, 1000);
    let stats = state.db.ip_stats(date, limit).await?;
    Ok(Json(json!({ "data": stats.data, "total_ips": stats.total_ips })))
}

/// `GET /api/analytics/referers`: non-empty referers by count.
#[tracing::instrument(skip(state))]
pub async fn get_referers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitedDateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let limit = query.limit.unwrap_or(DEFAULT_REFERER_LIMIT).clamp(1, 1000);
    let rows = state.db.referer_stats(date, limit).await?;
    Ok(Json(json!({ "data": rows })))
}

#[tracing::instrument(skip(state))]
pub async fn get_event_types(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let rows = state.db.event_type_stats(date).await?;
    Ok(Json(json!({ "data": rows })))
}

/// `GET /api/analytics/hourly`: 24 buckets by hour in the server timezone,
/// zero-filled.
#[tracing::instrument(skip(state))]
pub async fn get_hourly(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let rows = state.db.hourly_stats(date, state.config.timezone).await?;
    Ok(Json(json!({ "data": rows })))
}

#[tracing::instrument(skip(state))]
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let stats = state.db.session_stats(date).await?;
    Ok(Json(json!({
        "data": stats.data,
        "total_sessions": stats.total_sessions,
    })))
}

/// `GET /api/analytics/user-agent-stats`: requests per user-agent hash.
#[tracing::instrument(skip(state))]
pub async fn get_user_agents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitedDateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_USER_AGENT_LIMIT)
        .clamp(1, MAX_USER_AGENT_LIMIT);
    let rows = state.db.user_agent_stats(date, limit).await?;
    Ok(Json(json!({ "data": rows, "limit": limit })))
}

#[tracing::instrument(skip(state))]
pub async fn get_path_analysis(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let rows = state.db.path_analysis(date).await?;
    Ok(Json(json!({ "data": rows })))
}

/// `GET /api/analytics/advanced-stats`: totals and per-session averages.
#[tracing::instrument(skip(state))]
pub async fn get_advanced(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = parse_date_param(query.date.as_deref(), "date", state.today())?;
    let stats = state.db.advanced_stats(date).await?;
    Ok(Json(json!({ "date": date, "data": stats })))
}
