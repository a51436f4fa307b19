//! Pelorus agent supervisor
//!
//! Launches the configured fleet of agent processes, speaks the JSON-lines
//! control protocol with each over stdio, health-checks them on a fixed
//! cadence, relaunches failures within a bounded restart budget, and
//! publishes per-agent metrics and a fleet-wide health summary to the
//! shared metrics store.
//!
//! The entry point is [`AgentSupervisor`]: construct it from a
//! [`FleetConfig`](pelorus_core::config::FleetConfig), call
//! [`initialize`](AgentSupervisor::initialize), and interact through the
//! status, restart, and event-subscription methods until
//! [`shutdown`](AgentSupervisor::shutdown).

pub mod error;
pub mod monitor;
pub mod process;
pub mod restart;
pub mod supervisor;

pub use error::{Result, SupervisorError};
pub use monitor::{HealthCheckResult, HealthOutcome};
pub use process::{AgentProcess, ExitInfo, ProcessEvent, ProcessSignal};
pub use restart::{BackoffPolicy, ExponentialBackoff, FixedDelay, RestartDecision};
pub use supervisor::AgentSupervisor;
