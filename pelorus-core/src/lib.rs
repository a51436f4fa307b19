//! Pelorus core - shared types for the agent fleet supervisor
//!
//! The passage-planning product runs its domain workers (weather lookup,
//! tide tables, route geometry, safety scoring) as independent agent
//! processes under a single coordinator. This crate carries everything the
//! coordinator and its collaborators agree on:
//! - Fleet and per-agent configuration ([`config`])
//! - The stdio wire protocol spoken with agent processes ([`protocol`])
//! - Agent status and fleet health snapshots ([`fleet`])
//! - Lifecycle events for external subscribers ([`events`])
//! - The shared metrics store dashboards read from ([`metrics`])
//!
//! The supervisor itself lives in `pelorus-supervisor`; agents are opaque
//! executables that only need to speak the [`protocol`] contract.

pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod metrics;
pub mod protocol;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AgentConfig, FleetConfig, SupervisorSettings};
    pub use crate::error::{PelorusError, Result};
    pub use crate::events::{EventBus, SupervisorEvent};
    pub use crate::fleet::{AgentHealthRecord, AgentStatus, FleetHealthSummary};
    pub use crate::metrics::{InMemoryMetricsStore, MetricsStore};
    pub use crate::protocol::{AgentMessage, AgentMetrics, LogLevel};
}
