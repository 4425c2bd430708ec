//! Request handling and transformation.
//!
//! # Responsibilities
//! - Rewrite the URI to the upstream authority, keeping path and query
//! - Strip hop-by-hop headers
//! - Add X-Forwarded-For, X-Forwarded-Host, X-Forwarded-Proto
//!
//! # Design Decisions
//! - Request ID is set by middleware before the handler runs
//! - The original Host header is preserved for the upstream
//! - Bodies are streamed, never buffered

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    uri::{Authority, PathAndQuery, Scheme},
    Request, Uri,
};

use crate::http::response::ProxyError;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Read the request ID set by the middleware.
pub fn request_id<B>(req: &Request<B>) -> String {
    req.headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Build the request sent to the upstream.
pub fn upstream_request(
    request: Request<Body>,
    authority: &Authority,
    client_addr: Option<SocketAddr>,
) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let original_host = parts.headers.get(header::HOST).cloned();
    strip_hop_by_hop(&mut parts.headers);

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let forwarded = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = original_host {
        parts.headers.insert(X_FORWARDED_HOST, host);
    }
    parts
        .headers
        .insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    Ok(Request::from_parts(parts, body))
}
