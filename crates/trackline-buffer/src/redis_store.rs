//! Redis-backed buffer store.
//!
//! Layout per day bucket:
//! - `tracking:{date}` list of JSON-encoded events (LPUSH, order irrelevant)
//! - `stats:{date}` hash of counters
//! - `visitors:{date}` set of client IPs
//!
//! plus the global `online_users` sorted set (member = IP, score = last-seen
//! unix seconds). Each write runs in a MULTI/EXEC pipeline together with the
//! EXPIRE that refreshes the key's retention TTL.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{info, warn};

use trackline_core::{
    buffer::{presence_cutoff, BufferStore, CounterKey, DayCounters},
    event::Event,
};

use crate::keys::{
    counter_field, counters_key, day_keys, events_key, parse_counter_field, visitors_key,
    PRESENCE_KEY,
};

pub struct RedisBuffer {
    conn: ConnectionManager,
    ttl_secs: i64,
}

impl RedisBuffer {
    /// Connect to `redis_url` and verify the connection with a PING.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("redis connection failed")?;
        let buffer = Self {
            conn,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        };
        buffer.ping().await?;
        info!(ttl_secs = buffer.ttl_secs, "Redis buffer connected");
        Ok(buffer)
    }
}

#[async_trait]
impl BufferStore for RedisBuffer {
    async fn append_event(&self, date: NaiveDate, event: &Event) -> Result<()> {
        let key = events_key(date);
        let json = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, json)
            .ignore()
            .expire(&key, self.ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment_counter(
        &self,
        date: NaiveDate,
        key: &CounterKey,
        delta: i64,
    ) -> Result<i64> {
        let hash = counters_key(date);
        let mut conn = self.conn.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .hincr(&hash, counter_field(key), delta)
            .expire(&hash, self.ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn add_unique_visitor(&self, date: NaiveDate, ip: &str) -> Result<bool> {
        let set = visitors_key(date);
        let mut conn = self.conn.clone();
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .sadd(&set, ip)
            .expire(&set, self.ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn read_day_events(&self, date: NaiveDate) -> Result<Vec<Event>> {
        let key = events_key(date);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;

        let mut events = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Event>(&entry) {
                Ok(event) => events.push(event),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable buffered event"),
            }
        }
        Ok(events)
    }

    async fn count_day_events(&self, date: NaiveDate) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(events_key(date)).await?;
        Ok(len)
    }

    async fn read_counters(&self, date: NaiveDate) -> Result<DayCounters> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, i64> = conn.hgetall(counters_key(date)).await?;
        Ok(DayCounters::from_entries(fields.into_iter().filter_map(
            |(field, count)| parse_counter_field(&field).map(|key| (key, count)),
        )))
    }

    async fn purge_day(&self, date: NaiveDate) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&day_keys(date)[..]).await?;
        Ok(())
    }

    async fn update_presence(&self, ip: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(PRESENCE_KEY, ip, at.timestamp()).await?;
        Ok(())
    }

    async fn sweep_presence(&self, window: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = presence_cutoff(window, now);
        let mut conn = self.conn.clone();
        let removed: u64 = conn.zrembyscore(PRESENCE_KEY, "-inf", cutoff).await?;
        Ok(removed)
    }

    async fn count_presence(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(PRESENCE_KEY).await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
