use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

pub const MAX_PATH_LEN: usize = 2048;
pub const MAX_REFERER_LEN: usize = 2048;
pub const MAX_EVENT_TYPE_LEN: usize = 64;
/// Content IDs are stored in a signed BIGINT column.
pub const MAX_ARTICLE_ID: u64 = i64::MAX as u64;

/// The payload the client sends to POST /api/track.
///
/// `article_id` is also accepted under the name `content_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPayload {
    pub path: String,
    pub event_type: String,
    pub referer: Option<String>,
    #[serde(alias = "content_id")]
    pub article_id: Option<u64>,
}

impl TrackPayload {
    /// Reject payloads that would produce an unusable event.
    ///
    /// Runs before anything touches the buffer, so a rejected payload leaves
    /// no trace.
    pub fn validate(&self) -> Result<(), CoreError> {
        let path = self.path.trim();
        if path.is_empty() {
            return Err(CoreError::validation("path", "must not be empty"));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(CoreError::validation(
                "path",
                format!("must be at most {MAX_PATH_LEN} bytes"),
            ));
        }

        let event_type = self.event_type.trim();
        if event_type.is_empty() {
            return Err(CoreError::validation("event_type", "must not be empty"));
        }
        if event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(CoreError::validation(
                "event_type",
                format!("must be at most {MAX_EVENT_TYPE_LEN} bytes"),
            ));
        }

        if let Some(referer) = &self.referer {
            if referer.len() > MAX_REFERER_LEN {
                return Err(CoreError::validation(
                    "referer",
                    format!("must be at most {MAX_REFERER_LEN} bytes"),
                ));
            }
        }

        if self.article_id.is_some_and(|id| id > MAX_ARTICLE_ID) {
            return Err(CoreError::validation(
                "article_id",
                format!("must be at most {MAX_ARTICLE_ID}"),
            ));
        }
        Ok(())
    }
}

/// Kind of tracked interaction.
///
/// The set is open: anything other than the two well-known kinds is kept
/// verbatim as [`EventType::Other`]. `content_click` is accepted as a
/// synonym for `article_click` and normalised on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PageView,
    ArticleClick,
    Other(String),
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "page_view" => Self::PageView,
            "article_click" | "content_click" => Self::ArticleClick,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PageView => "page_view",
            Self::ArticleClick => "article_click",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn is_article_click(&self) -> bool {
        matches!(self, Self::ArticleClick)
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded event, as buffered and later persisted to the `tracking_events` table.
///
/// `id` is assigned at receipt and doubles as the durable row key, so a retried
/// rollup cannot insert the same event twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub ip_address: String,
    pub user_agent_hash: String,
    pub referer: String,
    pub event_type: EventType,
    pub article_id: Option<u64>,
    pub session_id: String,
}

impl Event {
    /// Content ID counted by the per-content breakdown: article clicks only.
    pub fn clicked_article(&self) -> Option<u64> {
        if self.event_type.is_article_click() {
            self.article_id
        } else {
            None
        }
    }
}
