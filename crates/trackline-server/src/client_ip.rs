//! Proxy-aware client address resolution.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use ipnet::IpNet;

/// Address recorded when neither headers nor the transport yield one.
pub const UNKNOWN_IP: &str = "unknown";

/// Headers consulted for the client address, most trusted first.
const IP_HEADERS: [&str; 6] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

const PRIVATE_RANGES: [&str; 6] = [
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::1/128",
    "fc00::/7",
];

/// Transport peer address, present when the server was started with
/// `into_make_service_with_connect_info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaybeConnectInfo(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for MaybeConnectInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

pub fn is_private(ip: &IpAddr) -> bool {
    PRIVATE_RANGES
        .iter()
        .filter_map(|range| range.parse::<IpNet>().ok())
        .any(|net| net.contains(ip))
}

/// Pull an address out of one header value.
///
/// Only the first list entry counts. `for=` parameters (RFC 7239), quotes,
/// brackets and ports are stripped.
fn parse_header_value(raw: &str) -> Option<IpAddr> {
    let first = raw.split(',').next()?.trim();
    let value = match first.to_ascii_lowercase().find("for=") {
        Some(pos) => first[pos + 4..].split(';').next().unwrap_or_default(),
        None => first,
    };
    let value = value.trim().trim_matches('"');

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = value.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    value
        .trim_start_matches('[')
        .split(']')
        .next()
        .and_then(|v| v.parse::<IpAddr>().ok())
}

/// Resolve the client address for an inbound request.
///
/// The first header address that is public wins. Without one, the first
/// parseable header address is used, then the peer. A private result yields
/// to a public peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let candidates: Vec<IpAddr> = IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_header_value)
        .collect();
    let peer_ip = peer.map(|p| p.ip());

    let resolved = candidates
        .iter()
        .find(|ip| !is_private(ip))
        .or_else(|| candidates.first())
        .copied()
        .or(peer_ip);

    match (resolved, peer_ip) {
        (Some(ip), Some(peer)) if is_private(&ip) && !is_private(&peer) => peer.to_string(),
        (Some(ip), _) => ip.to_string(),
        (None, _) => UNKNOWN_IP.to_string(),
    }
}
