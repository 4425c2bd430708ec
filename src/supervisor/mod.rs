//! Restart supervision subsystem.
//!
//! # Data Flow
//! ```text
//! Health monitor verdict flip ──▶ runner.rs ◀── periodic reconcile tick
//!                                    │
//!                                    ▼
//!                          policy.rs (Running/Restarting/Backoff)
//!                                    │ Action::Restart
//!                                    ▼
//!                          launcher.rs (kill + respawn child)
//!                                    │ completion
//!                                    ▼
//!                          runner.rs → policy.rs → RestartView
//! ```
//!
//! # Design Decisions
//! - Relaunches run on their own tasks; the control loop never blocks on them
//! - Relaunch failures back off and retry; nothing here is fatal
//! - The supervisor never touches health state, it only reads verdicts

pub mod backoff;
pub mod launcher;
pub mod policy;
pub mod runner;

pub use launcher::{CommandLauncher, Launcher, RestartError};
pub use policy::{Action, FailureSignal, RestartPolicy, RestartRecord, RestartState};
pub use runner::{RestartSnapshot, RestartView, Supervisor};
