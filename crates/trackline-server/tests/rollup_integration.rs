use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use uuid::Uuid;

use trackline_buffer::MemoryBuffer;
use trackline_core::{
    buffer::{BufferStore, DayCounters, CounterKey},
    clock::ManualClock,
    durable::{DailyAggregate, DurableStore, PathHeatmapRow},
    event::{Event, EventType},
};
use trackline_duckdb::DuckDbBackend;
use trackline_server::rollup::{RollupEngine, RollupError, RollupOutcome};

const TTL: Duration = Duration::from_secs(72 * 3600);

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
}

fn event(ip: &str, path: &str, kind: EventType, article: Option<u64>) -> Event {
    Event {
        id: Uuid::new_v4(),
        timestamp: start(),
        path: path.to_string(),
        ip_address: ip.to_string(),
        user_agent_hash: "ua".to_string(),
        referer: String::new(),
        event_type: kind,
        article_id: article,
        session_id: format!("s-{ip}"),
    }
}

/// Two page views on `/a` from one client, one article click on `/b` from another.
fn scenario() -> Vec<Event> {
    vec![
        event("1.1.1.1", "/a", EventType::PageView, None),
        event("1.1.1.1", "/a", EventType::PageView, None),
        event("2.2.2.2", "/b", EventType::ArticleClick, Some(7)),
    ]
}

struct Harness {
    clock: Arc<ManualClock>,
    buffer: Arc<MemoryBuffer>,
    db: Arc<DuckDbBackend>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let buffer = Arc::new(MemoryBuffer::new(clock.clone(), TTL));
        let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
        Self { clock, buffer, db }
    }

    fn engine(&self) -> RollupEngine {
        RollupEngine::new(self.buffer.clone(), self.db.clone(), 100, 50)
    }

    async fn buffer_events(&self, events: &[Event]) {
        for e in events {
            self.buffer.append_event(day(), e).await.expect("append");
        }
    }
}

#[tokio::test]
async fn rollup_aggregates_the_reference_day() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;

    let outcome = h.engine().run(day()).await.expect("rollup");
    assert_eq!(
        outcome,
        RollupOutcome::Aggregated {
            date: day(),
            events: 3,
            inserted: 3,
            paths: 2,
            purged: true,
        }
    );

    let aggregate = h
        .db
        .get_daily_aggregate(day())
        .await
        .expect("read")
        .expect("aggregate row");
    assert_eq!(
        aggregate,
        DailyAggregate {
            date: day(),
            page_views: 3,
            unique_visitors: 2,
            article_clicks: 1,
            top_paths: BTreeMap::from([("/a".to_string(), 2), ("/b".to_string(), 1)]),
            top_content: BTreeMap::from([("7".to_string(), 1)]),
        }
    );

    let heatmap = h.db.list_heatmap(day()).await.expect("heatmap");
    let rows: Vec<(&str, i64, i64)> = heatmap
        .iter()
        .map(|r| (r.path.as_str(), r.views, r.clicks))
        .collect();
    assert_eq!(rows, vec![("/a", 2, 0), ("/b", 1, 1)]);

    assert!(h.buffer.read_day_events(day()).await.expect("read").is_empty());
    assert_eq!(
        h.buffer.read_counters(day()).await.expect("counters"),
        DayCounters::default()
    );
}

#[tokio::test]
async fn page_views_match_buffered_event_count() {
    let h = Harness::new();
    let events: Vec<Event> = (0..250)
        .map(|i| event(&format!("203.0.113.{}", i % 7), "/feed", EventType::PageView, None))
        .collect();
    h.buffer_events(&events).await;

    h.engine().run(day()).await.expect("rollup");

    let aggregate = h
        .db
        .get_daily_aggregate(day())
        .await
        .expect("read")
        .expect("aggregate row");
    assert_eq!(aggregate.page_views, 250);
    assert_eq!(aggregate.unique_visitors, 7);
}

#[tokio::test]
async fn rerun_over_the_same_events_is_idempotent() {
    let h = Harness::new();
    let events = scenario();
    let engine = h.engine();

    h.buffer_events(&events).await;
    engine.run(day()).await.expect("first rollup");
    let first_aggregate = h.db.get_daily_aggregate(day()).await.expect("read");
    let first_heatmap = h.db.list_heatmap(day()).await.expect("heatmap");

    // The same events buffered again, as after a crash before the purge.
    h.buffer_events(&events).await;
    let outcome = engine.run(day()).await.expect("second rollup");
    match outcome {
        RollupOutcome::Aggregated {
            events, inserted, ..
        } => {
            assert_eq!(events, 3);
            assert_eq!(inserted, 0, "raw rows must not be duplicated");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(
        h.db.get_daily_aggregate(day()).await.expect("read"),
        first_aggregate
    );
    assert_eq!(h.db.list_heatmap(day()).await.expect("heatmap"), first_heatmap);
}

#[tokio::test]
async fn expired_bucket_makes_rollup_a_no_op() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;
    h.clock.advance(TimeDelta::hours(73));

    let outcome = h.engine().run(day()).await.expect("rollup");
    assert_eq!(outcome, RollupOutcome::Empty { date: day() });
    assert!(h.db.get_daily_aggregate(day()).await.expect("read").is_none());
}

#[tokio::test]
async fn concurrent_runs_for_one_date_are_serialised() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;
    let engine = h.engine();

    let (a, b) = tokio::join!(engine.run(day()), engine.run(day()));
    let outcomes = [a.expect("first"), b.expect("second")];

    let aggregated = outcomes
        .iter()
        .filter(|o| matches!(o, RollupOutcome::Aggregated { .. }))
        .count();
    assert_eq!(aggregated, 1, "outcomes: {outcomes:?}");
    assert!(outcomes.contains(&RollupOutcome::Empty { date: day() }));
    assert_eq!(engine.locked_dates(), 0);
}

/// DuckDB store that fails selected operations on demand.
struct FaultyStore {
    inner: DuckDbBackend,
    fail_raw_batch: Option<usize>,
    fail_upsert: bool,
    stall_raw_insert: bool,
    raw_batches: AtomicUsize,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: DuckDbBackend::open_in_memory().expect("in-memory DuckDB"),
            fail_raw_batch: None,
            fail_upsert: false,
            stall_raw_insert: false,
            raw_batches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DurableStore for FaultyStore {
    async fn insert_raw_events(&self, date: NaiveDate, events: &[Event]) -> anyhow::Result<usize> {
        let batch = self.raw_batches.fetch_add(1, Ordering::SeqCst);
        if self.stall_raw_insert {
            std::future::pending::<()>().await;
        }
        if self.fail_raw_batch == Some(batch) {
            anyhow::bail!("disk full");
        }
        self.inner.insert_raw_events(date, events).await
    }

    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> anyhow::Result<()> {
        if self.fail_upsert {
            anyhow::bail!("constraint violation");
        }
        self.inner.upsert_daily_aggregate(aggregate).await
    }

    async fn delete_heatmap(&self, date: NaiveDate) -> anyhow::Result<usize> {
        self.inner.delete_heatmap(date).await
    }

    async fn insert_heatmap_rows(&self, rows: &[PathHeatmapRow]) -> anyhow::Result<()> {
        self.inner.insert_heatmap_rows(rows).await
    }

    async fn get_daily_aggregate(&self, date: NaiveDate) -> anyhow::Result<Option<DailyAggregate>> {
        self.inner.get_daily_aggregate(date).await
    }

    async fn list_heatmap(&self, date: NaiveDate) -> anyhow::Result<Vec<PathHeatmapRow>> {
        self.inner.list_heatmap(date).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        DurableStore::ping(&self.inner).await
    }
}

#[tokio::test]
async fn failed_aggregate_write_keeps_the_buffer() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;
    let store = Arc::new(FaultyStore {
        fail_upsert: true,
        ..FaultyStore::new()
    });
    let engine = RollupEngine::new(h.buffer.clone(), store.clone(), 100, 50);

    let err = engine.run(day()).await.expect_err("upsert must fail");
    assert!(matches!(err, RollupError::Aggregate { .. }), "{err}");

    assert_eq!(h.buffer.count_day_events(day()).await.expect("count"), 3);
    assert!(store.list_heatmap(day()).await.expect("heatmap").is_empty());
}

#[tokio::test]
async fn failed_raw_batch_stops_after_earlier_batches() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;
    let store = Arc::new(FaultyStore {
        fail_raw_batch: Some(1),
        ..FaultyStore::new()
    });
    let engine = RollupEngine::new(h.buffer.clone(), store.clone(), 2, 50);

    let err = engine.run(day()).await.expect_err("second batch must fail");
    match err {
        RollupError::RawEvents { written, .. } => assert_eq!(written, 2),
        other => panic!("unexpected error {other}"),
    }
    assert!(store.get_daily_aggregate(day()).await.expect("read").is_none());
    assert_eq!(h.buffer.count_day_events(day()).await.expect("count"), 3);

    // A retry with a healthy store finishes the day without duplicating rows.
    let retry = RollupEngine::new(h.buffer.clone(), h.db.clone(), 2, 50);
    retry.run(day()).await.expect("retry");
    let aggregate = h
        .db
        .get_daily_aggregate(day())
        .await
        .expect("read")
        .expect("aggregate row");
    assert_eq!(aggregate.page_views, 3);
}

/// Memory buffer whose purge always fails.
#[tokio::test]
async fn cancelled_run_releases_its_date_lock() {
    let h = Harness::new();
    h.buffer_events(&scenario()).await;
    let store = FaultyStore {
        stall_raw_insert: true,
        ..FaultyStore::new()
    };
    let engine = Arc::new(RollupEngine::new(
        h.buffer.clone(),
        Arc::new(store),
        100,
        50,
    ));

    let task = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(day()).await }
    });
    while engine.locked_dates() == 0 {
        tokio::task::yield_now().await;
    }

    task.abort();
    assert!(task.await.expect_err("aborted").is_cancelled());
    assert_eq!(engine.locked_dates(), 0);
    // Nothing was purged, so a later run still sees the day.
    assert_eq!(h.buffer.count_day_events(day()).await.expect("count"), 3);
}

struct StickyBuffer(MemoryBuffer);

#[async_trait]
impl BufferStore for StickyBuffer {
    async fn append_event(&self, date: NaiveDate, event: &Event) -> anyhow::Result<()> {
        self.0.append_event(date, event).await
    }

    async fn increment_counter(
        &self,
        date: NaiveDate,
        key: &CounterKey,
        delta: i64,
    ) -> anyhow::Result<i64> {
        self.0.increment_counter(date, key, delta).await
    }

    async fn add_unique_visitor(&self, date: NaiveDate, ip: &str) -> anyhow::Result<bool> {
        self.0.add_unique_visitor(date, ip).await
    }

    async fn read_day_events(&self, date: NaiveDate) -> anyhow::Result<Vec<Event>> {
        self.0.read_day_events(date).await
    }

    async fn count_day_events(&self, date: NaiveDate) -> anyhow::Result<usize> {
        self.0.count_day_events(date).await
    }

    async fn read_counters(&self, date: NaiveDate) -> anyhow::Result<DayCounters> {
        self.0.read_counters(date).await
    }

    async fn purge_day(&self, _date: NaiveDate) -> anyhow::Result<()> {
        anyhow::bail!("connection reset")
    }

    async fn update_presence(&self, ip: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.0.update_presence(ip, at).await
    }

    async fn sweep_presence(&self, window: Duration, now: DateTime<Utc>) -> anyhow::Result<u64> {
        self.0.sweep_presence(window, now).await
    }

    async fn count_presence(&self) -> anyhow::Result<u64> {
        self.0.count_presence().await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.0.ping().await
    }
}

#[tokio::test]
async fn purge_failure_is_reported_but_not_fatal() {
    let clock = Arc::new(ManualClock::new(start()));
    let buffer = Arc::new(StickyBuffer(MemoryBuffer::new(clock, TTL)));
    for e in scenario() {
        buffer.append_event(day(), &e).await.expect("append");
    }
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let engine = RollupEngine::new(buffer.clone(), db.clone(), 100, 50);

    match engine.run(day()).await.expect("rollup") {
        RollupOutcome::Aggregated { purged, .. } => assert!(!purged),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(db.get_daily_aggregate(day()).await.expect("read").is_some());
    assert_eq!(buffer.count_day_events(day()).await.expect("count"), 3);
}
