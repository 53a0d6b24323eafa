pub mod breakdowns;
pub mod history;

pub use breakdowns::{
    AdvancedStats, EventTypeStat, HourlyStat, IpStat, IpStats, PathAnalysis, RefererStat,
    SessionStat, SessionStats, UserAgentStat,
};
pub use history::{EventPage, EventQuery, StoredEvent};
