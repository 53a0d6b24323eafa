use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, TimeDelta, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use trackline_buffer::MemoryBuffer;
use trackline_core::{
    buffer::BufferStore,
    clock::ManualClock,
    config::Config,
};
use trackline_duckdb::DuckDbBackend;
use trackline_server::app::build_app;
use trackline_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/trackline-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        redis_url: None,
        timezone: chrono_tz::UTC,
        rollup_offset_minutes: 5,
        buffer_ttl_hours: 72,
        presence_window_minutes: 30,
        raw_event_batch_size: 100,
        heatmap_batch_size: 50,
        scheduler_enabled: false,
        admin_token: None,
        cors_origins: vec![],
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
}

struct TestApp {
    app: Router,
    clock: Arc<ManualClock>,
    buffer: Arc<MemoryBuffer>,
}

fn setup_with(config: Config) -> TestApp {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let buffer = Arc::new(MemoryBuffer::new(
        clock.clone(),
        Duration::from_secs(72 * 3600),
    ));
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(config, clock.clone(), buffer.clone(), db));
    TestApp {
        app: build_app(state),
        clock,
        buffer,
    }
}

fn setup() -> TestApp {
    setup_with(test_config())
}

fn track_request(body: Value, ip: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/track")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .header("user-agent", user_agent)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

fn rollup_request(date: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/admin/rollup")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(json!({ "date": date }).to_string()))
        .expect("build request")
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn track_buffers_event_and_returns_session() {
    let t = setup();
    let (status, json) = send(
        &t.app,
        track_request(
            json!({ "path": "/a", "event_type": "page_view" }),
            "203.0.113.5",
            "Mozilla/5.0",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Event tracked");
    let session = json["data"]["session_id"].as_str().expect("session id");
    assert_eq!(session.len(), 32);
    assert!(json["data"]["timestamp"].is_string());

    let events = t.buffer.read_day_events(day()).await.expect("read");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip_address, "203.0.113.5");
    assert_eq!(events[0].session_id, session);
    assert_ne!(events[0].user_agent_hash, "Mozilla/5.0");

    let counters = t.buffer.read_counters(day()).await.expect("counters");
    assert_eq!(counters.page_views, 1);
    assert_eq!(counters.unique_visitors, 1);
    assert_eq!(counters.paths().get("/a"), Some(&1));
}

#[tokio::test]
async fn same_client_same_day_keeps_session_and_visitor_count() {
    let t = setup();
    let body = json!({ "path": "/a", "event_type": "page_view" });
    let (_, first) = send(&t.app, track_request(body.clone(), "203.0.113.5", "UA")).await;
    t.clock.advance(TimeDelta::hours(1));
    let (_, second) = send(&t.app, track_request(body, "203.0.113.5", "UA")).await;

    assert_eq!(first["data"]["session_id"], second["data"]["session_id"]);
    let counters = t.buffer.read_counters(day()).await.expect("counters");
    assert_eq!(counters.page_views, 2);
    assert_eq!(counters.unique_visitors, 1);
}

#[tokio::test]
async fn content_click_alias_counts_as_article_click() {
    let t = setup();
    let (status, _) = send(
        &t.app,
        track_request(
            json!({ "path": "/b", "event_type": "content_click", "content_id": 7 }),
            "203.0.113.5",
            "UA",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = t.buffer.read_day_events(day()).await.expect("read");
    assert!(events[0].event_type.is_article_click());
    assert_eq!(events[0].article_id, Some(7));
    let counters = t.buffer.read_counters(day()).await.expect("counters");
    assert_eq!(counters.content().get("7"), Some(&1));
}

#[tokio::test]
async fn invalid_payload_is_rejected_without_side_effects() {
    let t = setup();
    let (status, json) = send(
        &t.app,
        track_request(
            json!({ "path": "   ", "event_type": "page_view" }),
            "203.0.113.5",
            "UA",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
    assert_eq!(json["error"]["field"], "path");

    let missing_field = t
        .app
        .clone()
        .oneshot(track_request(json!({ "path": "/a" }), "203.0.113.5", "UA"))
        .await
        .expect("request");
    assert!(missing_field.status().is_client_error());

    assert!(t.buffer.read_day_events(day()).await.expect("read").is_empty());
    assert_eq!(t.buffer.count_presence().await.expect("presence"), 0);
    assert_eq!(
        t.buffer.read_counters(day()).await.expect("counters").page_views,
        0
    );
}

#[tokio::test]
async fn peer_address_used_when_headers_are_private() {
    let t = setup();
    let mut request = track_request(
        json!({ "path": "/a", "event_type": "page_view" }),
        "10.0.0.8",
        "UA",
    );
    let peer: SocketAddr = "198.51.100.20:40000".parse().expect("addr");
    request.extensions_mut().insert(ConnectInfo(peer));

    let response = t.app.clone().oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let events = t.buffer.read_day_events(day()).await.expect("read");
    assert_eq!(events[0].ip_address, "198.51.100.20");
}

#[tokio::test]
async fn realtime_reports_presence_and_today_counters() {
    let t = setup();
    for (ip, path) in [("203.0.113.1", "/a"), ("203.0.113.1", "/a"), ("203.0.113.2", "/b")] {
        send(
            &t.app,
            track_request(json!({ "path": path, "event_type": "page_view" }), ip, "UA"),
        )
        .await;
    }

    let (status, json) = send(&t.app, get("/api/analytics/realtime")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["online_users"], 2);
    assert_eq!(json["data"]["today_page_views"], 3);
    assert_eq!(json["data"]["today_visitors"], 2);
    assert_eq!(json["data"]["top_paths"][0]["key"], "/a");
    assert_eq!(json["data"]["top_paths"][0]["count"], 2);

    t.clock.advance(TimeDelta::minutes(31));
    let (_, json) = send(&t.app, get("/api/analytics/realtime")).await;
    assert_eq!(json["data"]["online_users"], 0);
}

#[tokio::test]
async fn track_then_rollup_serves_history() {
    let t = setup();
    let clicks = [
        (json!({ "path": "/a", "event_type": "page_view" }), "203.0.113.1"),
        (json!({ "path": "/a", "event_type": "page_view" }), "203.0.113.1"),
        (
            json!({ "path": "/b", "event_type": "article_click", "article_id": 7 }),
            "203.0.113.2",
        ),
    ];
    for (body, ip) in clicks {
        let (status, _) = send(&t.app, track_request(body, ip, "UA")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(&t.app, rollup_request("2024-03-01", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "aggregated");
    assert_eq!(json["data"]["events"], 3);

    let (status, json) = send(&t.app, get("/api/analytics/daily?date=2024-03-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["page_views"], 3);
    assert_eq!(json["data"]["unique_visitors"], 2);
    assert_eq!(json["data"]["article_clicks"], 1);
    assert_eq!(json["data"]["top_paths"]["/a"], 2);
    assert_eq!(json["data"]["top_content"]["7"], 1);

    let (_, json) = send(&t.app, get("/api/analytics/top-pages?date=2024-03-01")).await;
    assert_eq!(json["data"][0]["path"], "/a");
    assert_eq!(json["data"][1]["clicks"], 1);

    let (_, json) = send(
        &t.app,
        get("/api/analytics/events?date=2024-03-01&event_type=article_click"),
    )
    .await;
    assert_eq!(json["pagination"]["total"], 1);
    assert_eq!(json["data"][0]["article_id"], 7);

    let (_, json) = send(&t.app, get("/api/analytics/hourly?date=2024-03-01")).await;
    assert_eq!(json["data"].as_array().map(Vec::len), Some(24));
    assert_eq!(json["data"][12]["count"], 3);

    let (_, json) = send(&t.app, get("/api/analytics/path-analysis?date=2024-03-01")).await;
    assert_eq!(json["data"][0]["path"], "/a");
    assert_eq!(json["data"][0]["total_views"], 2);
    assert_eq!(json["data"][0]["unique_visitors"], 1);

    let (_, json) = send(
        &t.app,
        get("/api/analytics/user-agent-stats?date=2024-03-01&limit=5"),
    )
    .await;
    assert_eq!(json["limit"], 5);
    assert_eq!(json["data"][0]["count"], 3);

    let (_, json) = send(&t.app, get("/api/analytics/advanced-stats?date=2024-03-01")).await;
    assert_eq!(json["data"]["total_events"], 3);
    assert_eq!(json["data"]["unique_visitors"], 2);
    assert_eq!(json["data"]["unique_sessions"], 2);

    let (_, json) = send(&t.app, get("/api/admin/buffer?date=2024-03-01")).await;
    assert_eq!(json["data"]["buffered_events"], 0);
}

#[tokio::test]
async fn rollup_without_body_defaults_to_yesterday() {
    let t = setup();
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/rollup")
        .body(Body::empty())
        .expect("build request");

    let (status, json) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "empty");
    assert_eq!(json["data"]["date"], "2024-02-29");
}

#[tokio::test]
async fn daily_for_unknown_date_is_404() {
    let t = setup();
    let (status, json) = send(&t.app, get("/api/analytics/daily?date=2023-01-01")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn malformed_dates_and_limits_are_rejected() {
    let t = setup();
    let (status, json) = send(&t.app, get("/api/analytics/daily?date=03/01/2024")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "date");

    let (status, _) = send(&t.app, get("/api/analytics/events?limit=5000")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        get("/api/analytics/range?start_date=2024-03-05&end_date=2024-03-01"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_configured_token() {
    let config = Config {
        admin_token: Some("s3cret".to_string()),
        ..test_config()
    };
    let t = setup_with(config);

    let (status, json) = send(&t.app, rollup_request("2024-03-01", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");

    let (status, _) = send(&t.app, rollup_request("2024-03-01", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = send(&t.app, rollup_request("2024-03-01", Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "empty");

    // History reads are guarded too.
    let (status, _) = send(&t.app, get("/api/analytics/events?date=2024-03-01")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let mut authorized = get("/api/analytics/events?date=2024-03-01");
    authorized.headers_mut().insert(
        "authorization",
        "Bearer s3cret".parse().expect("header value"),
    );
    let (status, json) = send(&t.app, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pagination"]["total"], 0);

    // Ingest and realtime stay open.
    let (status, _) = send(&t.app, get("/api/analytics/realtime")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &t.app,
        track_request(
            json!({ "path": "/a", "event_type": "page_view" }),
            "203.0.113.5",
            "UA",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
