/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `TRACKLINE_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit: the DuckDB default (80% of system RAM) is not acceptable for a
/// server process.
///
/// `page_heatmap` has no unique key on (date, path): DuckDB checks unique
/// constraints eagerly and rejects a delete-then-reinsert of the same key
/// inside one transaction. The per-date rollup lock keeps the rows unique.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- TRACKING EVENTS (raw history, written by rollup)
-- ===========================================
CREATE TABLE IF NOT EXISTS tracking_events (
    id              VARCHAR PRIMARY KEY,           -- UUID v4 assigned at receipt
    event_date      DATE NOT NULL,                 -- day bucket the event was buffered under
    occurred_at     TIMESTAMP NOT NULL,            -- receipt time, UTC
    path            VARCHAR NOT NULL,
    ip_address      VARCHAR NOT NULL,
    user_agent_hash VARCHAR(64) NOT NULL,          -- sha256(user_agent); never stored raw
    referer         VARCHAR NOT NULL DEFAULT '',
    event_type      VARCHAR NOT NULL,              -- 'page_view' | 'article_click' | ...
    article_id      BIGINT,
    session_id      VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tracking_events_date_time
    ON tracking_events(event_date, occurred_at);
CREATE INDEX IF NOT EXISTS idx_tracking_events_date_ip
    ON tracking_events(event_date, ip_address);
CREATE INDEX IF NOT EXISTS idx_tracking_events_date_session
    ON tracking_events(event_date, session_id);

-- ===========================================
-- DAILY STATS (one row per date, upserted by rollup)
-- ===========================================
CREATE TABLE IF NOT EXISTS daily_stats (
    date            DATE PRIMARY KEY,
    page_views      BIGINT NOT NULL DEFAULT 0,
    unique_visitors BIGINT NOT NULL DEFAULT 0,
    article_clicks  BIGINT NOT NULL DEFAULT 0,
    top_pages       VARCHAR NOT NULL DEFAULT '{{}}', -- JSON object path -> views
    top_articles    VARCHAR NOT NULL DEFAULT '{{}}', -- JSON object article id -> clicks
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- PAGE HEATMAP (per date and path, replaced wholesale by rollup)
-- ===========================================
CREATE TABLE IF NOT EXISTS page_heatmap (
    date            DATE NOT NULL,
    path            VARCHAR NOT NULL,
    views           BIGINT NOT NULL DEFAULT 0,
    clicks          BIGINT NOT NULL DEFAULT 0,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_page_heatmap_date ON page_heatmap(date);
"#
    )
}
