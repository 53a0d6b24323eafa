use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// One-way hash of a raw User-Agent header: sha256, 64 lowercase hex chars.
///
/// The raw header never leaves the recorder; only this digest is buffered
/// and persisted.
pub fn hash_user_agent(user_agent: &str) -> String {
    hex::encode(Sha256::digest(user_agent.as_bytes()))
}

/// Compute the convenience session ID for a visitor on a given receipt date.
///
/// Formula: sha256("{ip}_{user_agent}_{YYYY-MM-DD}")[0..16] as 32 hex chars.
///
/// Deterministic per (IP, UA, day). It groups events for reporting and is
/// not an authentication token.
pub fn compute_session_id(ip: &str, user_agent: &str, date: NaiveDate) -> String {
    let input = format!("{}_{}_{}", ip, user_agent, date.format("%Y-%m-%d"));
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..16])
}
