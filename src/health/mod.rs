//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer per upstream
//!     → Probe the upstream's liveness path
//!     → HealthWriter publishes a new snapshot (state.rs)
//!     → Verdict flips sent to the restart supervisor
//!
//! Request path:
//!     Router → HealthBoard::current() (lock-free snapshot load)
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-upstream
//! - Only the monitor writes; request outcomes never move the verdict

pub mod active;
pub mod state;

pub use active::{HealthMonitor, ProbeFailure, UpstreamProber};
pub use state::{HealthBoard, HealthState, HealthWriter, ProbeOutcome, Thresholds, Verdict, VerdictChange};
