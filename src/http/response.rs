//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the upstream response with status and body unchanged
//! - Strip hop-by-hop headers
//! - Map proxy failures to gateway status codes
//! - Cut off a relayed body that outlives the request deadline
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Unhealthy upstreams answer 503, connection failures 502, timeouts 504

use std::error::Error as StdError;

use axum::body::{Body, Bytes};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::{stream, StreamExt};
use http_body_util::LengthLimitError;
use hyper::body::Incoming;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::http::request::strip_hop_by_hop;
use crate::routing::RoutingError;

/// Every way a proxied request can fail, as seen by the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("upstream '{0}' is unhealthy")]
    Unhealthy(String),

    #[error("upstream '{upstream}' request failed: {reason}")]
    Upstream { upstream: String, reason: String },

    #[error("upstream '{0}' timed out")]
    Timeout(String),

    #[error("could not build upstream request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Routing(_) => StatusCode::NOT_FOUND,
            ProxyError::Unhealthy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } | ProxyError::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let message = match &self {
            ProxyError::Routing(_) => "No matching route found",
            ProxyError::Unhealthy(_) => "Upstream unavailable",
            ProxyError::Upstream { .. } | ProxyError::InvalidRequest(_) => "Upstream request failed",
            ProxyError::Timeout(_) => "Upstream timed out",
            ProxyError::PayloadTooLarge => "Request body too large",
        };
        (self.status(), message).into_response()
    }
}

/// Whether a client error was caused by the request body limit.
///
/// Streamed (chunked) bodies are only cut off by the limiter while the
/// upstream request is in flight, so the failure shows up here.
pub fn exceeded_body_limit(error: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Turn an upstream response into the client response.
///
/// The body keeps streaming until `deadline`; after that the stream ends
/// with an error and the client connection is aborted.
pub fn relay(response: Response<Incoming>, upstream: String, deadline: Instant) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let frames = Body::new(body).into_data_stream();
    let bounded = stream::unfold(Some(frames), move |state| {
        let upstream = upstream.clone();
        async move {
            let mut frames = state?;
            match time::timeout_at(deadline, frames.next()).await {
                Ok(Some(chunk)) => Some((chunk, Some(frames))),
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!(upstream = %upstream, "Upstream response body exceeded request timeout");
                    let error = ProxyError::Timeout(upstream);
                    Some((Err::<Bytes, _>(axum::Error::new(error)), None))
                }
            }
        }
    });
    Response::from_parts(parts, Body::from_stream(bounded))
}
