use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;

use trackline_core::durable::{DailyAggregate, PathHeatmapRow};
use trackline_core::event::Event;

use crate::backend::{date_param, parse_date, TS_FORMAT};
use crate::DuckDbBackend;

pub(crate) const DAILY_STATS_COLUMNS: &str = "CAST(date AS VARCHAR), page_views, unique_visitors, \
     article_clicks, top_pages, top_articles";

/// Map a row selected with [`DAILY_STATS_COLUMNS`].
pub(crate) fn daily_stats_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawDailyStats> {
    Ok(RawDailyStats {
        date: row.get(0)?,
        page_views: row.get(1)?,
        unique_visitors: row.get(2)?,
        article_clicks: row.get(3)?,
        top_pages: row.get(4)?,
        top_articles: row.get(5)?,
    })
}

pub(crate) struct RawDailyStats {
    date: String,
    page_views: i64,
    unique_visitors: i64,
    article_clicks: i64,
    top_pages: String,
    top_articles: String,
}

impl RawDailyStats {
    pub(crate) fn into_aggregate(self) -> Result<DailyAggregate> {
        Ok(DailyAggregate {
            date: parse_date(&self.date)?,
            page_views: self.page_views,
            unique_visitors: self.unique_visitors,
            article_clicks: self.article_clicks,
            top_paths: serde_json::from_str::<BTreeMap<String, i64>>(&self.top_pages)?,
            top_content: serde_json::from_str::<BTreeMap<String, i64>>(&self.top_articles)?,
        })
    }
}

impl DuckDbBackend {
    /// Insert a batch of raw events in a single transaction.
    ///
    /// `INSERT OR IGNORE` on the event id makes a retried rollup skip rows an
    /// earlier, partially failed run already wrote. Returns the number of new
    /// rows. No-op for an empty slice.
    pub async fn insert_tracking_events(&self, date: NaiveDate, events: &[Event]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let event_date = date_param(date);
        let mut inserted = 0usize;

        for event in events {
            let article_id = event.article_id.map(i64::try_from).transpose()?;
            inserted += tx.execute(
                r#"INSERT OR IGNORE INTO tracking_events (
                    id, event_date, occurred_at, path, ip_address, user_agent_hash,
                    referer, event_type, article_id, session_id
                ) VALUES (
                    ?1, CAST(?2 AS DATE), CAST(?3 AS TIMESTAMP), ?4, ?5, ?6,
                    ?7, ?8, ?9, ?10
                )"#,
                duckdb::params![
                    event.id.to_string(),
                    event_date,
                    event.timestamp.format(TS_FORMAT).to_string(),
                    event.path,
                    event.ip_address,
                    event.user_agent_hash,
                    event.referer,
                    event.event_type.as_str(),
                    article_id,
                    event.session_id,
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            date = %date,
            batch = events.len(),
            inserted,
            "Inserted tracking events"
        );
        Ok(inserted)
    }

    pub async fn upsert_daily_stats(&self, aggregate: &DailyAggregate) -> Result<()> {
        let top_pages = serde_json::to_string(&aggregate.top_paths)?;
        let top_articles = serde_json::to_string(&aggregate.top_content)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO daily_stats (
                date, page_views, unique_visitors, article_clicks, top_pages, top_articles,
                created_at, updated_at
            ) VALUES (
                CAST(?1 AS DATE), ?2, ?3, ?4, ?5, ?6, now(), now()
            )
            ON CONFLICT (date) DO UPDATE SET
                page_views = EXCLUDED.page_views,
                unique_visitors = EXCLUDED.unique_visitors,
                article_clicks = EXCLUDED.article_clicks,
                top_pages = EXCLUDED.top_pages,
                top_articles = EXCLUDED.top_articles,
                updated_at = now()"#,
            duckdb::params![
                date_param(aggregate.date),
                aggregate.page_views,
                aggregate.unique_visitors,
                aggregate.article_clicks,
                top_pages,
                top_articles,
            ],
        )?;
        Ok(())
    }

    pub async fn get_daily_stats(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAILY_STATS_COLUMNS} FROM daily_stats WHERE date = CAST(?1 AS DATE)"
        ))?;
        let mut rows = stmt.query_map(duckdb::params![date_param(date)], daily_stats_from_row)?;
        let first = rows.next().transpose()?;
        first.map(RawDailyStats::into_aggregate).transpose()
    }

    pub async fn delete_heatmap_rows(&self, date: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM page_heatmap WHERE date = CAST(?1 AS DATE)",
            duckdb::params![date_param(date)],
        )?;
        Ok(removed)
    }

    /// Insert one batch of heatmap rows in a single transaction.
    pub async fn insert_heatmap_batch(&self, rows: &[PathHeatmapRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT INTO page_heatmap (date, path, views, clicks) \
                 VALUES (CAST(?1 AS DATE), ?2, ?3, ?4)",
                duckdb::params![date_param(row.date), row.path, row.views, row.clicks],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn get_heatmap(&self, date: NaiveDate) -> Result<Vec<PathHeatmapRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT path, views, clicks FROM page_heatmap \
             WHERE date = CAST(?1 AS DATE) ORDER BY path",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date)], |row| {
            Ok(PathHeatmapRow {
                date,
                path: row.get(0)?,
                views: row.get(1)?,
                clicks: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
