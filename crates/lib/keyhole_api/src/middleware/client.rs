//! Client metadata (IP address, user agent) for sessions, audit and rate limits.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use keyhole_core::models::ClientInfo;

use crate::AppState;

/// Longest user agent kept; longer values are truncated.
const MAX_USER_AGENT_LEN: usize = 512;

/// Extractor yielding the caller's [`ClientInfo`].
#[derive(Debug, Clone)]
pub struct ClientMeta(pub ClientInfo);

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientMeta(client_info(
            parts,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Build [`ClientInfo`] from request parts.
pub fn client_info(parts: &Parts, trust_proxy_headers: bool) -> ClientInfo {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip_address = if trust_proxy_headers {
        forwarded_ip(&parts.headers).or_else(|| peer.map(|addr| addr.ip().to_string()))
    } else {
        peer.map(|addr| addr.ip().to_string())
    };
    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
    ClientInfo::new(ip_address, user_agent)
}

/// Proxy-supplied client IP, in priority order: `CF-Connecting-IP`,
/// `X-Real-IP`, then the first hop of `X-Forwarded-For`.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let first_hop = |chain: &str| chain.split(',').next().map(str::trim).map(str::to_string);
    ["CF-Connecting-IP", "X-Real-IP", "X-Forwarded-For"]
        .into_iter()
        .filter_map(|name| headers.get(name).and_then(|v| v.to_str().ok()))
        .filter_map(first_hop)
        .find(|ip| looks_like_ip(ip))
}

fn looks_like_ip(value: &str) -> bool {
    value.parse::<std::net::IpAddr>().is_ok()
}
