use anyhow::Result;
use chrono::{NaiveDate, Timelike};
use chrono_tz::Tz;
use serde::Serialize;

use crate::backend::{date_param, parse_timestamp};
use crate::DuckDbBackend;

const SESSION_STATS_LIMIT: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct IpStat {
    pub ip_address: String,
    pub count: i64,
    pub last_visit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpStats {
    pub data: Vec<IpStat>,
    pub total_ips: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefererStat {
    pub referer: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventTypeStat {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HourlyStat {
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStat {
    pub session_id: String,
    pub event_count: i64,
    pub first_visit: String,
    pub last_visit: String,
    pub ip_address: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub data: Vec<SessionStat>,
    pub total_sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAgentStat {
    pub user_agent_hash: String,
    pub count: i64,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PathAnalysis {
    pub path: String,
    pub total_views: i64,
    pub unique_visitors: i64,
}

/// Whole-day engagement figures.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdvancedStats {
    pub total_events: i64,
    pub unique_visitors: i64,
    pub unique_sessions: i64,
    /// Mean of (last event - first event) per session, in seconds.
    pub avg_session_duration: f64,
    /// Zero when the day has no sessions.
    pub avg_events_per_session: f64,
}

impl DuckDbBackend {
    /// The `limit` most active client addresses for `date`. `total_ips`
    /// counts every distinct address regardless of the limit.
    pub async fn ip_stats(&self, date: NaiveDate, limit: i64) -> Result<IpStats> {
        let conn = self.conn.lock().await;
        let day = date_param(date);

        let total_ips: i64 = conn
            .prepare(
                "SELECT COUNT(DISTINCT ip_address) FROM tracking_events \
                 WHERE event_date = CAST(?1 AS DATE)",
            )?
            .query_row(duckdb::params![day], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT ip_address, COUNT(*) AS hits, CAST(MAX(occurred_at) AS VARCHAR) \
             FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY ip_address \
             ORDER BY hits DESC, ip_address \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(duckdb::params![day, limit], |row| {
            Ok(IpStat {
                ip_address: row.get(0)?,
                count: row.get(1)?,
                last_visit: row.get(2)?,
            })
        })?;

        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }
        Ok(IpStats { data, total_ips })
    }

    /// Referers for `date`. Direct traffic (empty referer) is excluded.
    pub async fn referer_stats(&self, date: NaiveDate, limit: i64) -> Result<Vec<RefererStat>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT referer, COUNT(*) AS hits FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) AND referer <> '' \
             GROUP BY referer \
             ORDER BY hits DESC, referer \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date), limit], |row| {
            Ok(RefererStat {
                referer: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn event_type_stats(&self, date: NaiveDate) -> Result<Vec<EventTypeStat>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT event_type, COUNT(*) AS hits FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY event_type \
             ORDER BY hits DESC, event_type",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date)], |row| {
            Ok(EventTypeStat {
                event_type: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Event counts per local hour of `date` in `tz`. Always 24 entries;
    /// hours without events report zero.
    ///
    /// Grouping happens per UTC minute in SQL; the local hour is resolved
    /// here so offsets that are not whole hours land in the right bucket.
    pub async fn hourly_stats(&self, date: NaiveDate, tz: Tz) -> Result<Vec<HourlyStat>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT CAST(date_trunc('minute', occurred_at) AS VARCHAR) AS minute, COUNT(*) \
             FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY minute",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut buckets: Vec<HourlyStat> = (0..24).map(|hour| HourlyStat { hour, count: 0 }).collect();
        for row in rows {
            let (minute, count) = row?;
            let hour = parse_timestamp(&minute)?.with_timezone(&tz).hour();
            if let Some(bucket) = buckets.get_mut(hour as usize) {
                bucket.count += count;
            }
        }
        Ok(buckets)
    }

    pub async fn session_stats(&self, date: NaiveDate) -> Result<SessionStats> {
        let conn = self.conn.lock().await;
        let day = date_param(date);

        let total_sessions: i64 = conn
            .prepare(
                "SELECT COUNT(DISTINCT session_id) FROM tracking_events \
                 WHERE event_date = CAST(?1 AS DATE)",
            )?
            .query_row(duckdb::params![day], |row| row.get(0))?;

        // A session id is derived from (ip, user agent, day), so ANY_VALUE on
        // ip_address is exact.
        let mut stmt = conn.prepare(
            "SELECT session_id, \
                    COUNT(*) AS hits, \
                    CAST(MIN(occurred_at) AS VARCHAR), \
                    CAST(MAX(occurred_at) AS VARCHAR), \
                    ANY_VALUE(ip_address), \
                    CAST(DATEDIFF('second', MIN(occurred_at), MAX(occurred_at)) AS BIGINT) \
             FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY session_id \
             ORDER BY hits DESC, session_id \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(duckdb::params![day, SESSION_STATS_LIMIT], |row| {
            Ok(SessionStat {
                session_id: row.get(0)?,
                event_count: row.get(1)?,
                first_visit: row.get(2)?,
                last_visit: row.get(3)?,
                ip_address: row.get(4)?,
                duration_seconds: row.get(5)?,
            })
        })?;

        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }
        Ok(SessionStats {
            data,
            total_sessions,
        })
    }

    /// The `limit` most frequent user-agent hashes for `date`.
    pub async fn user_agent_stats(&self, date: NaiveDate, limit: i64) -> Result<Vec<UserAgentStat>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT user_agent_hash, COUNT(*) AS hits, CAST(MAX(occurred_at) AS VARCHAR) \
             FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY user_agent_hash \
             ORDER BY hits DESC, user_agent_hash \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date), limit], |row| {
            Ok(UserAgentStat {
                user_agent_hash: row.get(0)?,
                count: row.get(1)?,
                last_seen: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every path hit on `date` with its view count and distinct client
    /// addresses, busiest first.
    pub async fn path_analysis(&self, date: NaiveDate) -> Result<Vec<PathAnalysis>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT path, COUNT(*) AS views, COUNT(DISTINCT ip_address) \
             FROM tracking_events \
             WHERE event_date = CAST(?1 AS DATE) \
             GROUP BY path \
             ORDER BY views DESC, path",
        )?;
        let rows = stmt.query_map(duckdb::params![date_param(date)], |row| {
            Ok(PathAnalysis {
                path: row.get(0)?,
                total_views: row.get(1)?,
                unique_visitors: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn advanced_stats(&self, date: NaiveDate) -> Result<AdvancedStats> {
        let conn = self.conn.lock().await;
        let day = date_param(date);

        let (total_events, unique_visitors, unique_sessions): (i64, i64, i64) = conn
            .prepare(
                "SELECT COUNT(*), COUNT(DISTINCT ip_address), COUNT(DISTINCT session_id) \
                 FROM tracking_events \
                 WHERE event_date = CAST(?1 AS DATE)",
            )?
            .query_row(duckdb::params![day], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        let avg_session_duration: f64 = conn
            .prepare(
                "SELECT CAST(COALESCE(AVG(span), 0) AS DOUBLE) FROM ( \
                     SELECT DATEDIFF('second', MIN(occurred_at), MAX(occurred_at)) AS span \
                     FROM tracking_events \
                     WHERE event_date = CAST(?1 AS DATE) \
                     GROUP BY session_id \
                 )",
            )?
            .query_row(duckdb::params![day], |row| row.get(0))?;

        let avg_events_per_session = if unique_sessions > 0 {
            total_events as f64 / unique_sessions as f64
        } else {
            0.0
        };

        Ok(AdvancedStats {
            total_events,
            unique_visitors,
            unique_sessions,
            avg_session_duration,
            avg_events_per_session,
        })
    }
}
