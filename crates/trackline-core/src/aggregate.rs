//! One-pass aggregation of a day's raw events.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

use crate::durable::{DailyAggregate, PathHeatmapRow};
use crate::event::Event;

/// Everything the rollup writes for one date besides the raw rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub aggregate: DailyAggregate,
    /// Ordered by path.
    pub heatmap: Vec<PathHeatmapRow>,
}

#[derive(Default)]
struct PathTally {
    views: i64,
    clicks: i64,
}

/// Fold `events` into the daily aggregate and heatmap rows for `date`.
///
/// The result depends only on the multiset of events, never on their order,
/// so recomputing over the same buffer always yields the same rows.
pub fn summarize_day(date: NaiveDate, events: &[Event]) -> DaySummary {
    let mut visitors: HashSet<&str> = HashSet::new();
    let mut article_clicks = 0i64;
    let mut paths: BTreeMap<&str, PathTally> = BTreeMap::new();
    let mut content: BTreeMap<String, i64> = BTreeMap::new();

    for event in events {
        visitors.insert(event.ip_address.as_str());

        let tally = paths.entry(event.path.as_str()).or_default();
        tally.views += 1;

        if event.event_type.is_article_click() {
            article_clicks += 1;
            tally.clicks += 1;
        }
        if let Some(id) = event.clicked_article() {
            *content.entry(id.to_string()).or_insert(0) += 1;
        }
    }

    let top_paths = paths
        .iter()
        .map(|(path, tally)| ((*path).to_string(), tally.views))
        .collect();

    let heatmap = paths
        .into_iter()
        .map(|(path, tally)| PathHeatmapRow {
            date,
            path: path.to_string(),
            views: tally.views,
            clicks: tally.clicks,
        })
        .collect();

    DaySummary {
        aggregate: DailyAggregate {
            date,
            page_views: events.len() as i64,
            unique_visitors: visitors.len() as i64,
            article_clicks,
            top_paths,
            top_content: content,
        },
        heatmap,
    }
}
