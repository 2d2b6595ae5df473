//! # Relay Core Module
//!
//! The part of the system that never looks inside the data: it connects the
//! feed, watches the aggregate's version, delivers each new version once and
//! stops cleanly when a monitored connection goes away.
//!
//! ## Contained Modules:
//! - **`sink`**: the versioned holding cell between engine and relay loop.
//! - **`scheduler`**: the fixed-cadence tick loop and its RUNNING/STOPPED
//!   state machine.
//! - **`lifecycle`**: one-time startup, the run call and ordered teardown.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Startup, run and teardown of a relay.
pub mod lifecycle;
/// The tick loop.
pub mod scheduler;
/// Versioned payload cell.
pub mod sink;

pub use lifecycle::{Relay, RelayError, SetupError};
pub use scheduler::{
    Deliver, MaintenanceHooks, SchedulerState, StopReason, TickScheduler, TickStats,
};
pub use sink::{AggregateSink, Snapshot};
