//! Health-aware reverse proxy for a small set of upstream services.
//!
//! Requests are matched against an immutable upstream registry, checked
//! against the latest health verdict, then forwarded or rejected. A restart
//! supervisor relaunches upstreams that stay unhealthy, with backoff.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod supervisor;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Proxy, Shutdown};
