use async_trait::async_trait;
use chrono::NaiveDate;

use trackline_core::durable::{DailyAggregate, DurableStore, PathHeatmapRow};
use trackline_core::event::Event;

use crate::DuckDbBackend;

#[async_trait]
impl DurableStore for DuckDbBackend {
    async fn insert_raw_events(&self, date: NaiveDate, events: &[Event]) -> anyhow::Result<usize> {
        DuckDbBackend::insert_tracking_events(self, date, events).await
    }

    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> anyhow::Result<()> {
        DuckDbBackend::upsert_daily_stats(self, aggregate).await
    }

    async fn delete_heatmap(&self, date: NaiveDate) -> anyhow::Result<usize> {
        DuckDbBackend::delete_heatmap_rows(self, date).await
    }

    async fn insert_heatmap_rows(&self, rows: &[PathHeatmapRow]) -> anyhow::Result<()> {
        DuckDbBackend::insert_heatmap_batch(self, rows).await
    }

    async fn get_daily_aggregate(&self, date: NaiveDate) -> anyhow::Result<Option<DailyAggregate>> {
        DuckDbBackend::get_daily_stats(self, date).await
    }

    async fn list_heatmap(&self, date: NaiveDate) -> anyhow::Result<Vec<PathHeatmapRow>> {
        DuckDbBackend::get_heatmap(self, date).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        DuckDbBackend::ping(self).await
    }
}
