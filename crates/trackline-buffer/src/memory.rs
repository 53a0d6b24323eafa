use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tokio::sync::Mutex;

use trackline_core::{
    buffer::{presence_cutoff, BufferStore, CounterKey, DayCounters},
    clock::Clock,
    event::Event,
};

struct DayBucket {
    events: Vec<Event>,
    counters: HashMap<CounterKey, i64>,
    visitors: HashSet<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    days: HashMap<NaiveDate, DayBucket>,
    /// IP → last-seen unix seconds.
    presence: HashMap<String, i64>,
}

impl DayBucket {
    fn empty(expires_at: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            counters: HashMap::new(),
            visitors: HashSet::new(),
            expires_at,
        }
    }
}

impl Inner {
    /// Drops every bucket whose TTL ran out, not just the one being accessed.
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        self.days.retain(|_, bucket| bucket.expires_at > now);
    }

    /// The bucket for `date`, unless it never existed or its TTL ran out.
    fn live_bucket(&mut self, date: NaiveDate, now: DateTime<Utc>) -> Option<&DayBucket> {
        self.evict_expired(now);
        self.days.get(&date)
    }

    /// Bucket for a write: created lazily, TTL refreshed.
    fn touch_bucket(
        &mut self,
        date: NaiveDate,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> &mut DayBucket {
        self.evict_expired(now);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let bucket = self
            .days
            .entry(date)
            .or_insert_with(|| DayBucket::empty(expires_at));
        bucket.expires_at = expires_at;
        bucket
    }
}

/// In-process buffer store.
///
/// One `tokio::sync::Mutex` guards all buckets, so every operation is atomic.
/// Expiry is evaluated lazily against the injected clock.
pub struct MemoryBuffer {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl MemoryBuffer {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Number of day buckets currently held, expired ones excluded.
    pub async fn held_days(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.evict_expired(now);
        inner.days.len()
    }
}

#[async_trait]
impl BufferStore for MemoryBuffer {
    async fn append_event(&self, date: NaiveDate, event: &Event) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner
            .touch_bucket(date, now, self.ttl)
            .events
            .push(event.clone());
        Ok(())
    }

    async fn increment_counter(
        &self,
        date: NaiveDate,
        key: &CounterKey,
        delta: i64,
    ) -> Result<i64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let counter = inner
            .touch_bucket(date, now, self.ttl)
            .counters
            .entry(key.clone())
            .or_insert(0);
        *counter += delta;
        Ok(*counter)
    }

    async fn add_unique_visitor(&self, date: NaiveDate, ip: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .touch_bucket(date, now, self.ttl)
            .visitors
            .insert(ip.to_string()))
    }

    async fn read_day_events(&self, date: NaiveDate) -> Result<Vec<Event>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_bucket(date, now)
            .map(|bucket| bucket.events.clone())
            .unwrap_or_default())
    }

    async fn count_day_events(&self, date: NaiveDate) -> Result<usize> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_bucket(date, now)
            .map_or(0, |bucket| bucket.events.len()))
    }

    async fn read_counters(&self, date: NaiveDate) -> Result<DayCounters> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_bucket(date, now)
            .map(|bucket| {
                DayCounters::from_entries(
                    bucket.counters.iter().map(|(k, v)| (k.clone(), *v)),
                )
            })
            .unwrap_or_default())
    }

    async fn purge_day(&self, date: NaiveDate) -> Result<()> {
        self.inner.lock().await.days.remove(&date);
        Ok(())
    }

    async fn update_presence(&self, ip: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner
            .lock()
            .await
            .presence
            .insert(ip.to_string(), at.timestamp());
        Ok(())
    }

    async fn sweep_presence(&self, window: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = presence_cutoff(window, now);
        let mut inner = self.inner.lock().await;
        let before = inner.presence.len();
        inner.presence.retain(|_, last_seen| *last_seen > cutoff);
        Ok((before - inner.presence.len()) as u64)
    }

    async fn count_presence(&self) -> Result<u64> {
        Ok(self.inner.lock().await.presence.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
