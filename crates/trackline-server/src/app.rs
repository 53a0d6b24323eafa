use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// CORS for the API. `/api/track` is called from third-party pages, so with
/// no configured origins every origin is allowed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: origins from `TRACKLINE_CORS_ORIGINS`, any when unset.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
/// 3. `CompressionLayer`: gzip for the analytics responses.
///
/// History reads and `/api/admin/*` additionally pass through
/// [`routes::admin::require_admin`]. Ingest, realtime and health stay open.
pub fn build_app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/analytics/daily", get(routes::stats::get_daily))
        .route("/api/analytics/range", get(routes::stats::get_range))
        .route("/api/analytics/top-pages", get(routes::stats::get_top_pages))
        .route("/api/analytics/events", get(routes::stats::get_events))
        .route("/api/analytics/ips", get(routes::stats::get_ips))
        .route("/api/analytics/referers", get(routes::stats::get_referers))
        .route(
            "/api/analytics/event-types",
            get(routes::stats::get_event_types),
        )
        .route("/api/analytics/hourly", get(routes::stats::get_hourly))
        .route("/api/analytics/sessions", get(routes::stats::get_sessions))
        .route(
            "/api/analytics/user-agent-stats",
            get(routes::stats::get_user_agents),
        )
        .route(
            "/api/analytics/path-analysis",
            get(routes::stats::get_path_analysis),
        )
        .route(
            "/api/analytics/advanced-stats",
            get(routes::stats::get_advanced),
        )
        .route("/api/admin/rollup", post(routes::admin::trigger_rollup))
        .route("/api/admin/buffer", get(routes::admin::get_buffer_summary))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            routes::admin::require_admin,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/track", post(routes::track::track))
        .route("/api/analytics/realtime", get(routes::realtime::get_realtime))
        .merge(protected)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
