pub mod app;
pub mod client_ip;
pub mod config;
pub mod error;
pub mod live_stats;
pub mod recorder;
pub mod rollup;
pub mod routes;
pub mod scheduler;
pub mod state;
