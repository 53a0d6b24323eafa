pub mod backend;
pub mod durable_impl;
pub mod queries;
pub mod rollup;
pub mod schema;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `trackline_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
