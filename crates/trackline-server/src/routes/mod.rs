pub mod admin;
pub mod health;
pub mod realtime;
pub mod stats;
pub mod track;

use chrono::NaiveDate;

use crate::error::AppError;

/// Parse an optional `YYYY-MM-DD` query value, falling back to `default`.
pub(crate) fn parse_date_param(
    raw: Option<&str>,
    field: &'static str,
    default: NaiveDate,
) -> Result<NaiveDate, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::Validation {
            field,
            message: format!("expected YYYY-MM-DD, got {s:?}"),
        }),
    }
}
