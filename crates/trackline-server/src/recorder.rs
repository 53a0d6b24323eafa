use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use trackline_core::{
    buffer::{BufferStore, CounterKey},
    clock::{local_date, Clock},
    error::CoreError,
    event::{Event, EventType, TrackPayload},
    visitor::{compute_session_id, hash_user_agent},
};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("buffer append failed: {0}")]
    Buffer(#[source] anyhow::Error),
}

/// Request metadata that accompanies a tracking payload.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Turns inbound tracking payloads into buffered events.
///
/// Only the event append is load-bearing. Presence, counters and the
/// visitor set are refreshed afterwards on a best-effort basis: a failure
/// there is logged and the call still succeeds.
pub struct EventRecorder {
    buffer: Arc<dyn BufferStore>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    presence_window: Duration,
}

impl EventRecorder {
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

    pub async fn record(
        &self,
        payload: TrackPayload,
        meta: &RequestMeta,
    ) -> Result<RecordOutcome, RecordError> {
        payload.validate()?;

        let now = self.clock.now();
        let date = local_date(now, self.timezone);
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: now,
            path: payload.path.trim().to_string(),
            ip_address: meta.ip.clone(),
            user_agent_hash: hash_user_agent(&meta.user_agent),
            referer: payload.referer.unwrap_or_default(),
            event_type: EventType::parse(&payload.event_type),
            article_id: payload.article_id,
            session_id: compute_session_id(&meta.ip, &meta.user_agent, date),
        };

        self.buffer
            .append_event(date, &event)
            .await
            .map_err(RecordError::Buffer)?;

        self.refresh_presence(&event.ip_address, now).await;
        self.bump_counters(date, &event).await;
        self.count_visitor(date, &event.ip_address).await;

        Ok(RecordOutcome {
            timestamp: event.timestamp,
            session_id: event.session_id,
        })
    }

    async fn refresh_presence(&self, ip: &str, now: DateTime<Utc>) {
        if let Err(e) = self.buffer.update_presence(ip, now).await {
            warn!(error = %e, "Presence update failed");
            return;
        }
        if let Err(e) = self.buffer.sweep_presence(self.presence_window, now).await {
            warn!(error = %e, "Presence sweep failed");
        }
    }

    async fn bump_counters(&self, date: NaiveDate, event: &Event) {
        let mut keys = vec![CounterKey::PageViews, CounterKey::Path(event.path.clone())];
        if let Some(id) = event.clicked_article() {
            keys.push(CounterKey::Content(id));
        }

        for key in &keys {
            if let Err(e) = self.buffer.increment_counter(date, key, 1).await {
                warn!(date = %date, counter = ?key, error = %e, "Counter increment failed");
            }
        }
    }

    async fn count_visitor(&self, date: NaiveDate, ip: &str) {
        match self.buffer.add_unique_visitor(date, ip).await {
            Ok(true) => {
                if let Err(e) = self
                    .buffer
                    .increment_counter(date, &CounterKey::UniqueVisitors, 1)
                    .await
                {
                    warn!(date = %date, error = %e, "Unique visitor increment failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(date = %date, error = %e, "Visitor set update failed"),
        }
    }
}
