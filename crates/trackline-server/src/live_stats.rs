use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::warn;

use trackline_core::{
    buffer::{BufferStore, DayCounters},
    clock::{local_date, Clock},
};

/// Entries kept in each top list of a [`LiveSnapshot`].
pub const TOP_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopEntry {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveSnapshot {
    pub date: NaiveDate,
    pub online_users: u64,
    pub today_visitors: i64,
    pub today_page_views: i64,
    pub top_paths: Vec<TopEntry>,
    pub top_articles: Vec<TopEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSummary {
    pub date: NaiveDate,
    pub buffered_events: usize,
    pub online_users: u64,
    pub counters: DayCounters,
}

/// Highest counts first, ties broken by key.
fn top_entries(counts: BTreeMap<String, i64>, limit: usize) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = counts
        .into_iter()
        .map(|(key, count)| TopEntry { key, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries.truncate(limit);
    entries
}

/// Read-only view over the buffer for dashboards and operators.
pub struct LiveStatsReader {
    buffer: Arc<dyn BufferStore>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    presence_window: Duration,
}

impl LiveStatsReader {
    pub fn new(
        buffer: Arc<dyn BufferStore>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        presence_window: Duration,
    ) -> Self {
        Self {
            buffer,
            clock,
            timezone,
            presence_window,
        }
    }

    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.timezone)
    }

    /// Clients seen within the presence window. Read failures count as zero.
    pub async fn online_users(&self) -> u64 {
        let now = self.clock.now();
        if let Err(e) = self.buffer.sweep_presence(self.presence_window, now).await {
            warn!(error = %e, "Presence sweep failed");
        }
        match self.buffer.count_presence().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Presence count failed");
                0
            }
        }
    }

    pub async fn snapshot(&self) -> Result<LiveSnapshot> {
        let date = self.today();
        let online_users = self.online_users().await;
        let counters = self.buffer.read_counters(date).await?;

        Ok(LiveSnapshot {
            date,
            online_users,
            today_visitors: counters.unique_visitors,
            today_page_views: counters.page_views,
            top_paths: top_entries(counters.paths(), TOP_LIMIT),
            top_articles: top_entries(counters.content(), TOP_LIMIT),
        })
    }

    /// What is still buffered for `date`, today when `None`.
    pub async fn buffer_summary(&self, date: Option<NaiveDate>) -> Result<BufferSummary> {
        let date = date.unwrap_or_else(|| self.today());
        let buffered_events = self.buffer.count_day_events(date).await?;
        let counters = self.buffer.read_counters(date).await?;
        let online_users = self.online_users().await;

        Ok(BufferSummary {
            date,
            buffered_events,
            online_users,
            counters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_entries_sort_by_count_then_key() {
        let counts = BTreeMap::from([
            ("/b".to_string(), 3),
            ("/a".to_string(), 3),
            ("/c".to_string(), 9),
            ("/d".to_string(), 1),
        ]);
        let top = top_entries(counts, 3);
        let keys: Vec<&str> = top.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/c", "/a", "/b"]);
    }
}
