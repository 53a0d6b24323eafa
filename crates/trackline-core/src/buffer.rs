//! Buffer store abstraction.
//!
//! The buffer holds everything that has not been rolled up yet: one bucket per
//! calendar date (event log, counter hash, unique-visitor set) plus a global
//! presence set. Every operation is atomic on its own key; nothing here needs
//! a cross-key transaction because rollup recomputes the day from the raw log.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::event::Event;

/// A counter inside a day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKey {
    PageViews,
    UniqueVisitors,
    Path(String),
    Content(u64),
}

/// The breakdown a per-item counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Path,
    Content,
}

impl CounterKey {
    /// `(kind, key)` for breakdown counters; `None` for the day totals.
    pub fn breakdown(&self) -> Option<(CounterKind, String)> {
        match self {
            Self::PageViews | Self::UniqueVisitors => None,
            Self::Path(path) => Some((CounterKind::Path, path.clone())),
            Self::Content(id) => Some((CounterKind::Content, id.to_string())),
        }
    }
}

/// All counters of one day bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayCounters {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub breakdown: BTreeMap<CounterKind, BTreeMap<String, i64>>,
}

impl DayCounters {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CounterKey, i64)>,
    {
        let mut counters = Self::default();
        for (key, count) in entries {
            match key {
                CounterKey::PageViews => counters.page_views += count,
                CounterKey::UniqueVisitors => counters.unique_visitors += count,
                other => {
                    if let Some((kind, item)) = other.breakdown() {
                        *counters
                            .breakdown
                            .entry(kind)
                            .or_default()
                            .entry(item)
                            .or_insert(0) += count;
                    }
                }
            }
        }
        counters
    }

    pub fn of_kind(&self, kind: CounterKind) -> BTreeMap<String, i64> {
        self.breakdown.get(&kind).cloned().unwrap_or_default()
    }

    pub fn paths(&self) -> BTreeMap<String, i64> {
        self.of_kind(CounterKind::Path)
    }

    pub fn content(&self) -> BTreeMap<String, i64> {
        self.of_kind(CounterKind::Content)
    }
}

/// Ephemeral per-day storage consumed by the recorder, the live stats reader
/// and the rollup engine.
///
/// Writes to a date's keys refresh that date's retention TTL, so a bucket that
/// is never rolled up eventually disappears on its own.
#[async_trait]
pub trait BufferStore: Send + Sync + 'static {
    async fn append_event(&self, date: NaiveDate, event: &Event) -> Result<()>;

    /// Returns the counter value after the increment.
    async fn increment_counter(&self, date: NaiveDate, key: &CounterKey, delta: i64)
        -> Result<i64>;

    /// Returns `true` when `ip` was not yet in the date's visitor set.
    async fn add_unique_visitor(&self, date: NaiveDate, ip: &str) -> Result<bool>;

    async fn read_day_events(&self, date: NaiveDate) -> Result<Vec<Event>>;

    async fn count_day_events(&self, date: NaiveDate) -> Result<usize>;

    async fn read_counters(&self, date: NaiveDate) -> Result<DayCounters>;

    /// Drop the date's event log, counters and visitor set.
    async fn purge_day(&self, date: NaiveDate) -> Result<()>;

    async fn update_presence(&self, ip: &str, at: DateTime<Utc>) -> Result<()>;

    /// Remove presence entries last seen at or before `now - window`.
    /// Returns how many were removed.
    async fn sweep_presence(&self, window: Duration, now: DateTime<Utc>) -> Result<u64>;

    async fn count_presence(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Unix-seconds score at or below which a presence entry is stale.
pub fn presence_cutoff(window: Duration, now: DateTime<Utc>) -> i64 {
    now.timestamp() - i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_split_into_typed_breakdowns() {
        let counters = DayCounters::from_entries([
            (CounterKey::PageViews, 3),
            (CounterKey::UniqueVisitors, 2),
            (CounterKey::Path("/a".to_string()), 2),
            (CounterKey::Path("/b".to_string()), 1),
            (CounterKey::Content(7), 1),
        ]);
        assert_eq!(counters.page_views, 3);
        assert_eq!(counters.unique_visitors, 2);
        assert_eq!(counters.paths().get("/a"), Some(&2));
        assert_eq!(counters.paths().get("/b"), Some(&1));
        assert_eq!(counters.content().get("7"), Some(&1));
    }

    #[test]
    fn path_that_looks_like_a_content_key_stays_a_path() {
        let counters =
            DayCounters::from_entries([(CounterKey::Path("article:7".to_string()), 1)]);
        assert!(counters.content().is_empty());
        assert_eq!(counters.paths().get("article:7"), Some(&1));
    }

    #[test]
    fn presence_cutoff_is_window_before_now() {
        let now = DateTime::from_timestamp(10_000, 0).unwrap_or_default();
        assert_eq!(presence_cutoff(Duration::from_secs(1800), now), 8_200);
    }
}
