//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → matcher.rs (extract RequestTarget, evaluate predicates)
//!     → registry.rs (first matching upstream)
//!     → decision.rs (attach the current verdict snapshot)
//!     → Return: RouteDecision or RoutingError::NotFound
//!
//! Registry Compilation (at startup):
//!     UpstreamConfig[]
//!     → Compile predicates in configuration order
//!     → Freeze as immutable UpstreamRegistry
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same upstream
//! - First match wins (configuration order)

pub mod decision;
pub mod matcher;
pub mod registry;

pub use decision::{decide, RouteDecision};
pub use matcher::RequestTarget;
pub use registry::{RoutingError, UpstreamRegistry, UpstreamService};
