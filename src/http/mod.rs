//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, body limit)
//!     → routing layer picks the upstream and reads its verdict
//!     → request.rs (rewrite URI, forwarding headers)
//!     → hyper client round trip (bounded by the request timeout)
//!     → response.rs (relay, or map failure to 404/502/503/504)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ProxyError;
pub use server::{AppState, HttpServer};
