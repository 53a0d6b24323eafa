use std::time::Duration;

use chrono_tz::Tz;

pub const DEFAULT_BUFFER_TTL_HOURS: u64 = 72;
pub const DEFAULT_PRESENCE_WINDOW_MINUTES: u64 = 30;
pub const DEFAULT_RAW_EVENT_BATCH_SIZE: usize = 100;
pub const DEFAULT_HEATMAP_BATCH_SIZE: usize = 50;
pub const DEFAULT_ROLLUP_OFFSET_MINUTES: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    /// `None` keeps the buffer in process memory (single node only).
    pub redis_url: Option<String>,
    /// Timezone that defines calendar days for buckets and the rollup schedule.
    pub timezone: Tz,
    /// Minutes after local midnight at which the daily rollup fires.
    pub rollup_offset_minutes: u32,
    pub buffer_ttl_hours: u64,
    pub presence_window_minutes: u64,
    pub raw_event_batch_size: usize,
    pub heatmap_batch_size: usize,
    pub scheduler_enabled: bool,
    /// Bearer token for `/api/admin/*`. `None` leaves admin routes open.
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("TRACKLINE_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("TRACKLINE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("TRACKLINE_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            redis_url: std::env::var("TRACKLINE_REDIS_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timezone: {
                let raw = std::env::var("TRACKLINE_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
                raw.parse::<Tz>()
                    .map_err(|e| format!("invalid timezone {raw:?}: {e}"))?
            },
            rollup_offset_minutes: std::env::var("TRACKLINE_ROLLUP_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .map(|v| v.min(23 * 60 + 59))
                .unwrap_or(DEFAULT_ROLLUP_OFFSET_MINUTES),
            buffer_ttl_hours: std::env::var("TRACKLINE_BUFFER_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_BUFFER_TTL_HOURS),
            presence_window_minutes: std::env::var("TRACKLINE_PRESENCE_WINDOW_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PRESENCE_WINDOW_MINUTES),
            raw_event_batch_size: std::env::var("TRACKLINE_RAW_EVENT_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_RAW_EVENT_BATCH_SIZE),
            heatmap_batch_size: std::env::var("TRACKLINE_HEATMAP_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_HEATMAP_BATCH_SIZE),
            scheduler_enabled: std::env::var("TRACKLINE_SCHEDULER")
                .map(|v| v != "false")
                .unwrap_or(true),
            admin_token: std::env::var("TRACKLINE_ADMIN_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            cors_origins: std::env::var("TRACKLINE_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_hours * 3600)
    }

    pub fn presence_window(&self) -> Duration {
        Duration::from_secs(self.presence_window_minutes * 60)
    }

    pub fn rollup_offset(&self) -> Duration {
        Duration::from_secs(u64::from(self.rollup_offset_minutes) * 60)
    }
}
