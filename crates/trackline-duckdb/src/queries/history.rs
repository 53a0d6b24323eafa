use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use trackline_core::durable::{DailyAggregate, PathHeatmapRow};

use crate::backend::date_param;
use crate::rollup::{daily_stats_from_row, DAILY_STATS_COLUMNS};
use crate::DuckDbBackend;

/// One persisted raw event as returned by the event log endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: String,
    pub event_date: String,
    pub timestamp: String,
    pub path: String,
    pub ip_address: String,
    pub user_agent_hash: String,
    pub referer: String,
    pub event_type: String,
    pub article_id: Option<i64>,
    pub session_id: String,
}

/// Filters and paging for [`DuckDbBackend::list_tracking_events`].
///
/// `page` is 1-based. `path` matches as a substring; the other filters are
/// exact.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub date: NaiveDate,
    pub page: i64,
    pub limit: i64,
    pub path: Option<String>,
    pub event_type: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<StoredEvent>,
    pub total: i64,
}

impl DuckDbBackend {
    /// Aggregates for every stored date in `[start, end]`, oldest first.
    /// Dates without a row are absent from the result.
    pub async fn get_stats_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregate>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAILY_STATS_COLUMNS} FROM daily_stats \
             WHERE date >= CAST(?1 AS DATE) AND date <= CAST(?2 AS DATE) \
             ORDER BY date"
        ))?;
        let rows = stmt.query_map(
            duckdb::params![date_param(start), date_param(end)],
            daily_stats_from_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_aggregate()?);
        }
        Ok(out)
    }

    /// Heatmap rows for `date`, most viewed first.
    pub async fn get_top_pages(&self, date: NaiveDate, limit: i64) -> Result<Vec<PathHeatmapRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT path, views, clicks FROM page_heatmap \
             WHERE date = CAST(?1 AS DATE) \
             ORDER BY views DESC, clicks DESC, path \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date), limit], |row| {
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

    /// Page through the raw events stored for one date, newest first.
    pub async fn list_tracking_events(&self, query: &EventQuery) -> Result<EventPage> {
        let conn = self.conn.lock().await;

        let mut filter = String::from("event_date = CAST(?1 AS DATE)");
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![Box::new(date_param(query.date))];
        let mut idx = 2;

        if let Some(ref path) = query.path {
            filter.push_str(&format!(" AND path LIKE ?{idx}"));
            params.push(Box::new(format!("%{path}%")));
            idx += 1;
        }
        if let Some(ref event_type) = query.event_type {
            filter.push_str(&format!(" AND event_type = ?{idx}"));
            params.push(Box::new(event_type.clone()));
            idx += 1;
        }
        if let Some(ref ip) = query.ip_address {
            filter.push_str(&format!(" AND ip_address = ?{idx}"));
            params.push(Box::new(ip.clone()));
            idx += 1;
        }

        let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tracking_events WHERE {filter}"),
            param_refs.as_slice(),
            |row| row.get(0),
        )?;

        let offset = (query.page.max(1) - 1) * query.limit;
        let sql = format!(
            "SELECT id, CAST(event_date AS VARCHAR), CAST(occurred_at AS VARCHAR), path, \
                    ip_address, user_agent_hash, referer, event_type, article_id, session_id \
             FROM tracking_events \
             WHERE {filter} \
             ORDER BY occurred_at DESC, id \
             LIMIT ?{} OFFSET ?{}",
            idx,
            idx + 1
        );
        params.push(Box::new(query.limit));
        params.push(Box::new(offset));
        let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(StoredEvent {
                id: row.get(0)?,
                event_date: row.get(1)?,
                timestamp: row.get(2)?,
                path: row.get(3)?,
                ip_address: row.get(4)?,
                user_agent_hash: row.get(5)?,
                referer: row.get(6)?,
                event_type: row.get(7)?,
                article_id: row.get(8)?,
                session_id: row.get(9)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(EventPage { events, total })
    }
}
