//! Durable store abstraction: the relational side of the rollup.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// One row per date in `daily_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub page_views: i64,
    pub unique_visitors: i64,
    pub article_clicks: i64,
    pub top_paths: BTreeMap<String, i64>,
    pub top_content: BTreeMap<String, i64>,
}

/// One row per (date, path) in `page_heatmap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHeatmapRow {
    pub date: NaiveDate,
    pub path: String,
    pub views: i64,
    pub clicks: i64,
}

#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Insert one batch of raw events for `date`.
    ///
    /// Rows are keyed by event id; ids already present are skipped. Returns
    /// the number of rows actually inserted.
    async fn insert_raw_events(&self, date: NaiveDate, events: &[Event]) -> Result<usize>;

    /// Insert the aggregate row for its date, or overwrite every field of the
    /// existing one.
    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> Result<()>;

    /// Remove all heatmap rows for `date`. Returns the number removed.
    async fn delete_heatmap(&self, date: NaiveDate) -> Result<usize>;

    async fn insert_heatmap_rows(&self, rows: &[PathHeatmapRow]) -> Result<()>;

    async fn get_daily_aggregate(&self, date: NaiveDate) -> Result<Option<DailyAggregate>>;

    /// Heatmap rows for `date`, ordered by path.
    async fn list_heatmap(&self, date: NaiveDate) -> Result<Vec<PathHeatmapRow>>;

    async fn ping(&self) -> Result<()>;
}
