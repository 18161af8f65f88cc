//! Resolve the address an event came from, as seen by the transport.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Originating address of the current request, if one could be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress(pub Option<String>);

impl FromRequestParts<AppState> for SourceAddress {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(resolve(
            &parts.headers,
            peer,
            state.config.trust_forwarded_for,
        )))
    }
}

/// Proxy headers win when trusted: first `X-Forwarded-For` hop, then
/// `X-Real-IP`. Otherwise the TCP peer's IP.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        let forwarded = header_str(headers, X_FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return Some(addr.to_string());
        }
        if let Some(addr) = header_str(headers, X_REAL_IP).map(str::trim).filter(|v| !v.is_empty()) {
            return Some(addr.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
