use std::sync::Arc;

use chrono::NaiveDate;

use trackline_core::{
    buffer::BufferStore,
    clock::{local_date, Clock},
    config::Config,
    durable::DurableStore,
};
use trackline_duckdb::DuckDbBackend;

use crate::live_stats::LiveStatsReader;
use crate::recorder::EventRecorder;
use crate::rollup::RollupEngine;
use crate::scheduler::{DailySchedule, Scheduler};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// The stores are built once in `main` (or a test) and handed in; every
/// component holds its own `Arc` to them.
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub clock: Arc<dyn Clock>,

    /// Ephemeral per-day buffer (Redis or in-process).
    pub buffer: Arc<dyn BufferStore>,

    /// The DuckDB backend. Serves history queries directly and backs the
    /// rollup through [`DurableStore`].
    pub db: Arc<DuckDbBackend>,

    pub recorder: EventRecorder,
    pub live: LiveStatsReader,
    pub rollup: Arc<RollupEngine>,
}

impl AppState {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        buffer: Arc<dyn BufferStore>,
        db: DuckDbBackend,
    ) -> Self {
        let db = Arc::new(db);
        let durable: Arc<dyn DurableStore> = db.clone();

        let recorder = EventRecorder::new(
            Arc::clone(&buffer),
            Arc::clone(&clock),
            config.timezone,
            config.presence_window(),
        );
        let live = LiveStatsReader::new(
            Arc::clone(&buffer),
            Arc::clone(&clock),
            config.timezone,
            config.presence_window(),
        );
        let rollup = Arc::new(RollupEngine::new(
            Arc::clone(&buffer),
            durable,
            config.raw_event_batch_size,
            config.heatmap_batch_size,
        ));

        Self {
            config: Arc::new(config),
            clock,
            buffer,
            db,
            recorder,
            live,
            rollup,
        }
    }

    /// Calendar date "now" falls on in the server timezone.
    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.config.timezone)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.rollup),
            Arc::clone(&self.clock),
            DailySchedule::new(self.config.timezone, self.config.rollup_offset()),
        )
    }
}
