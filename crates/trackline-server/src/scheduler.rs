//! Daily rollup scheduling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use trackline_core::clock::Clock;

use crate::rollup::RollupEngine;

/// Fires once per local day at midnight plus a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct DailySchedule {
    timezone: Tz,
    offset: Duration,
}

/// One scheduled run: when it fires and which date it rolls up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub at: DateTime<Utc>,
    pub rollup_date: NaiveDate,
}

impl DailySchedule {
    pub fn new(timezone: Tz, offset: Duration) -> Self {
        Self { timezone, offset }
    }

    /// Instant of the firing that belongs to local date `date`.
    ///
    /// A midnight skipped by a DST jump resolves to the first valid local
    /// time after it.
    fn fire_time(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let offset = TimeDelta::from_std(self.offset).ok()?;
        let mut local = date.and_time(NaiveTime::MIN) + offset;
        for _ in 0..4 {
            if let Some(at) = self.timezone.from_local_datetime(&local).earliest() {
                return Some(at.with_timezone(&Utc));
            }
            local += TimeDelta::minutes(30);
        }
        None
    }

    /// First firing strictly after `after`. It rolls up the local day before
    /// the one it fires on.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<Firing> {
        let today = after.with_timezone(&self.timezone).date_naive();
        (0..3u64)
            .filter_map(|n| today.checked_add_days(Days::new(n)))
            .filter_map(|date| Some((date, self.fire_time(date)?)))
            .find(|(_, at)| *at > after)
            .and_then(|(date, at)| {
                Some(Firing {
                    at,
                    rollup_date: date.pred_opt()?,
                })
            })
    }
}

/// Background task that runs the rollup once a day.
pub struct Scheduler {
    engine: Arc<RollupEngine>,
    clock: Arc<dyn Clock>,
    schedule: DailySchedule,
}

impl Scheduler {
    pub fn new(engine: Arc<RollupEngine>, clock: Arc<dyn Clock>, schedule: DailySchedule) -> Self {
        Self {
            engine,
            clock,
            schedule,
        }
    }

    /// Loop until `shutdown` is cancelled.
    ///
    /// Each cycle sleeps until the next firing, then rolls up the previous
    /// local day. A failed rollup is logged and the loop carries on. The next
    /// firing is always computed past the one just handled, so a slow run or
    /// a clock lagging behind the timer never fires the same day twice.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Rollup scheduler started");
        let mut previous: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            let from = previous.map_or(now, |p| p.max(now));
            let Some(firing) = self.schedule.next_after(from) else {
                error!(after = %from, "No rollup firing could be computed; scheduler stopping");
                return;
            };
            let wait = (firing.at - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                fire_at = %firing.at,
                rollup_date = %firing.rollup_date,
                wait_secs = wait.as_secs(),
                "Next rollup scheduled"
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Rollup scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Rollup scheduler stopped during rollup");
                    return;
                }
                result = self.engine.run(firing.rollup_date) => match result {
                    Ok(outcome) => info!(outcome = ?outcome, "Scheduled rollup finished"),
                    Err(e) => error!(error = %e, "Scheduled rollup failed"),
                }
            }

            previous = Some(firing.at);
        }
    }
}
