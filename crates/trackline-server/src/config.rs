/// Re-export `Config` from `trackline-core` for use within this crate.
///
/// All environment-variable parsing lives in `trackline-core` so integration
/// tests can build a `Config` without depending on the full server.
pub use trackline_core::config::Config;
