use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use trackline_core::{aggregate::summarize_day, buffer::BufferStore, durable::DurableStore};

/// A rollup step that failed. Every variant aborts the remaining steps for
/// the date and leaves the buffer untouched.
#[derive(Debug, Error)]
pub enum RollupError {
    #[error("reading buffered events for {date} failed: {source}")]
    ReadBuffer {
        date: NaiveDate,
        source: anyhow::Error,
    },

    #[error("persisting raw events for {date} failed after {written} events: {source}")]
    RawEvents {
        date: NaiveDate,
        written: usize,
        source: anyhow::Error,
    },

    #[error("upserting daily aggregate for {date} failed: {source}")]
    Aggregate {
        date: NaiveDate,
        source: anyhow::Error,
    },

    #[error("replacing heatmap for {date} failed: {source}")]
    Heatmap {
        date: NaiveDate,
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollupOutcome {
    /// Nothing was buffered for the date; no durable rows were touched.
    Empty { date: NaiveDate },
    Aggregated {
        date: NaiveDate,
        events: usize,
        /// Raw rows newly written. Lower than `events` on a retry.
        inserted: usize,
        paths: usize,
        /// `false` when the buffer purge failed after a successful write.
        purged: bool,
    },
}

/// Moves one day of buffered events into the durable store.
///
/// Runs for the same date are serialised by a per-date lock held for the
/// whole run; runs for different dates proceed independently.
pub struct RollupEngine {
    buffer: Arc<dyn BufferStore>,
    durable: Arc<dyn DurableStore>,
    raw_batch_size: usize,
    heatmap_batch_size: usize,
    locks: DateLocks,
}

type DateLocks = StdMutex<HashMap<NaiveDate, Arc<Mutex<()>>>>;

/// A claim on one date's lock. Dropping it, including when the owning
/// future is cancelled mid-run, prunes the registry entry once no other run
/// holds or awaits it.
struct DateLease<'a> {
    locks: &'a DateLocks,
    date: NaiveDate,
    lock: Arc<Mutex<()>>,
}

impl<'a> DateLease<'a> {
    fn acquire(locks: &'a DateLocks, date: NaiveDate) -> Self {
        let lock = Arc::clone(
            locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(date)
                .or_default(),
        );
        Self { locks, date, lock }
    }
}

impl Drop for DateLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The registry and this lease are the only owners left.
        if locks
            .get(&self.date)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.date);
        }
    }
}

impl RollupEngine {
    pub fn new(
        buffer: Arc<dyn BufferStore>,
        durable: Arc<dyn DurableStore>,
        raw_batch_size: usize,
        heatmap_batch_size: usize,
    ) -> Self {
        Self {
            buffer,
            durable,
            raw_batch_size: raw_batch_size.max(1),
            heatmap_batch_size: heatmap_batch_size.max(1),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, date: NaiveDate) -> Result<RollupOutcome, RollupError> {
        let lease = DateLease::acquire(&self.locks, date);
        let _guard = lease.lock.lock().await;
        self.run_locked(date).await
    }

    /// Dates with a run in progress or waiting for one.
    pub fn locked_dates(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn run_locked(&self, date: NaiveDate) -> Result<RollupOutcome, RollupError> {
        let events = self
            .buffer
            .read_day_events(date)
            .await
            .map_err(|source| RollupError::ReadBuffer { date, source })?;

        if events.is_empty() {
            info!(date = %date, "No buffered events, rollup skipped");
            return Ok(RollupOutcome::Empty { date });
        }

        let mut written = 0usize;
        let mut inserted = 0usize;
        for batch in events.chunks(self.raw_batch_size) {
            inserted += self
                .durable
                .insert_raw_events(date, batch)
                .await
                .map_err(|source| RollupError::RawEvents {
                    date,
                    written,
                    source,
                })?;
            written += batch.len();
        }

        let summary = summarize_day(date, &events);

        self.durable
            .upsert_daily_aggregate(&summary.aggregate)
            .await
            .map_err(|source| RollupError::Aggregate { date, source })?;

        self.durable
            .delete_heatmap(date)
            .await
            .map_err(|source| RollupError::Heatmap { date, source })?;
        for batch in summary.heatmap.chunks(self.heatmap_batch_size) {
            self.durable
                .insert_heatmap_rows(batch)
                .await
                .map_err(|source| RollupError::Heatmap { date, source })?;
        }

        let purged = match self.buffer.purge_day(date).await {
            Ok(()) => true,
            Err(e) => {
                warn!(date = %date, error = %e, "Buffer purge failed after rollup");
                false
            }
        };

        info!(
            date = %date,
            events = events.len(),
            inserted,
            page_views = summary.aggregate.page_views,
            unique_visitors = summary.aggregate.unique_visitors,
            article_clicks = summary.aggregate.article_clicks,
            paths = summary.heatmap.len(),
            purged,
            "Rollup complete"
        );

        Ok(RollupOutcome::Aggregated {
            date,
            events: events.len(),
            inserted,
            paths: summary.heatmap.len(),
            purged,
        })
    }
}
