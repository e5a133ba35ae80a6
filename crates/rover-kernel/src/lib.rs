//! `rover-kernel` – Arbitration & Safety
//!
//! The single place where competing command sources are reduced to one
//! actuation signal.  It does not perceive anything; it orders, gates, and
//! emits.
//!
//! # Modules
//!
//! - [`arbiter`] – [`CommandArbiter`][arbiter::CommandArbiter]: a fixed table
//!   holding the latest command per [`CommandPriority`][rover_types::CommandPriority]
//!   tier.  Every mutation re-evaluates the table and hands the winning
//!   command to the [`ActuationSink`] exactly once per change.  STRATEGIC
//!   commands are held for operator approval unless auto mode is on.
//! - [`sink`] – [`ActuationSink`][sink::ActuationSink]: the seam between the
//!   arbiter and the physical link.
//! - [`mission_log`] – [`MissionLog`][mission_log::MissionLog]: bounded,
//!   shared, human-readable event history.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: heartbeat deadlines for
//!   the camera feed and the gateway link.
//! - [`supervisor`] – [`SafetySupervisor`][supervisor::SafetySupervisor]:
//!   turns watchdog timeouts into SAFETY-tier stops and releases them when
//!   every link is healthy again.

pub mod arbiter;
pub mod mission_log;
pub mod sink;
pub mod supervisor;
pub mod watchdog;

pub use arbiter::{ArbiterStatus, CommandArbiter, CommandLogEntry, CommandSummary};
pub use mission_log::{MissionEntry, MissionLog};
pub use sink::{ActuationSink, FnSink};
pub use supervisor::SafetySupervisor;
pub use watchdog::{ComponentHealth, Watchdog};
