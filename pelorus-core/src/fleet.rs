//! Agent status and fleet health snapshot types

use crate::protocol::AgentMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a supervised agent
///
/// Transitions: `Starting -> Active <-> Error -> (restart scheduled) ->
/// Starting`, with `Error -> Maintenance` once the restart budget is
/// exhausted. `Maintenance` is terminal until an operator restart.
/// `Stopped` is only reachable by a clean voluntary exit on an agent
/// configured with `restart_on_clean_exit = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Launched, not yet confirmed healthy
    #[default]
    Starting,
    /// Last health check passed
    Active,
    /// Failed a health check or exited unexpectedly; recovery in progress
    Error,
    /// Restart budget exhausted; parked until operator intervention
    Maintenance,
    /// Exited voluntarily with code 0 and configured not to restart
    Stopped,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Active => "active",
            AgentStatus::Error => "error",
            AgentStatus::Maintenance => "maintenance",
            AgentStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Per-agent row in a fleet health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthRecord {
    pub id: String,
    pub status: AgentStatus,
    /// Seconds since the current process was launched, if running
    pub uptime_seconds: Option<i64>,
    pub restart_count: u32,
    pub last_check: Option<DateTime<Utc>>,
}

/// Fleet-wide health snapshot, recomputed periodically and published with
/// a short expiry so stale snapshots age out of the metrics store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetHealthSummary {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub starting: usize,
    pub maintenance: usize,
    pub stopped: usize,
    pub agents: Vec<AgentHealthRecord>,
}

/// Operator-facing snapshot of one agent: runtime state plus the latest
/// metrics payload it published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_healthy: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub metrics: Option<AgentMetrics>,
}
