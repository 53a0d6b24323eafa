//! Redis key and hash-field naming.
//!
//! The `path:` / `article:` field prefixes exist only on the wire; callers see
//! [`CounterKey`] values.

use chrono::NaiveDate;

use trackline_core::buffer::CounterKey;

pub const PRESENCE_KEY: &str = "online_users";

const PAGE_VIEWS_FIELD: &str = "page_views";
const UNIQUE_VISITORS_FIELD: &str = "unique_visitors";
const PATH_PREFIX: &str = "path:";
const CONTENT_PREFIX: &str = "article:";

fn day_key(prefix: &str, date: NaiveDate) -> String {
    format!("{}:{}", prefix, date.format("%Y-%m-%d"))
}

pub fn events_key(date: NaiveDate) -> String {
    day_key("tracking", date)
}

pub fn counters_key(date: NaiveDate) -> String {
    day_key("stats", date)
}

pub fn visitors_key(date: NaiveDate) -> String {
    day_key("visitors", date)
}

/// All keys that make up one day bucket.
pub fn day_keys(date: NaiveDate) -> [String; 3] {
    [events_key(date), counters_key(date), visitors_key(date)]
}

pub fn counter_field(key: &CounterKey) -> String {
    match key {
        CounterKey::PageViews => PAGE_VIEWS_FIELD.to_string(),
        CounterKey::UniqueVisitors => UNIQUE_VISITORS_FIELD.to_string(),
        CounterKey::Path(path) => format!("{PATH_PREFIX}{path}"),
        CounterKey::Content(id) => format!("{CONTENT_PREFIX}{id}"),
    }
}

/// Inverse of [`counter_field`]. Unknown fields yield `None`.
pub fn parse_counter_field(field: &str) -> Option<CounterKey> {
    match field {
        PAGE_VIEWS_FIELD => Some(CounterKey::PageViews),
        UNIQUE_VISITORS_FIELD => Some(CounterKey::UniqueVisitors),
        _ => {
            if let Some(path) = field.strip_prefix(PATH_PREFIX) {
                Some(CounterKey::Path(path.to_string()))
            } else if let Some(id) = field.strip_prefix(CONTENT_PREFIX) {
                id.parse().ok().map(CounterKey::Content)
            } else {
                None
            }
        }
    }
}
