//! Periodic per-agent health monitoring
//!
//! One monitor task per launched process, ticking at the agent's
//! configured interval. Checks run sequentially on the tick loop, so a
//! slow agent can never accumulate overlapping probes; ticks that would
//! have fired while a check was in flight are skipped.

use crate::process::AgentProcess;
use chrono::{DateTime, Utc};
use pelorus_core::protocol::AgentMetrics;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Result of one health-check round trip
#[derive(Debug, Clone)]
pub enum HealthOutcome {
    /// The agent replied within the deadline
    Healthy {
        metrics: AgentMetrics,
        /// Round-trip time of the check
        rtt: Duration,
    },
    /// The check failed outright (closed channel, protocol violation)
    Unhealthy { error: String },
    /// No reply arrived before the deadline
    Timeout,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }

    /// Short human-readable failure description, `None` when healthy
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            HealthOutcome::Healthy { .. } => None,
            HealthOutcome::Unhealthy { error } => Some(error.clone()),
            HealthOutcome::Timeout => Some("health check timed out".to_string()),
        }
    }
}

/// A completed check, delivered to the coordinator loop
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub agent_id: String,
    /// Launch generation of the probed process; results from a
    /// superseded launch are discarded by the coordinator
    pub generation: u64,
    pub outcome: HealthOutcome,
    pub checked_at: DateTime<Utc>,
}

/// Spawn the monitor loop for one process
///
/// Results go to `result_tx`; the loop ends when the receiver is dropped,
/// when the process exits, or when the coordinator aborts the handle
/// (restart, shutdown).
pub fn spawn_monitor(
    process: AgentProcess,
    check_interval: Duration,
    check_timeout: Duration,
    result_tx: mpsc::Sender<HealthCheckResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let agent_id = process.agent_id().to_string();
        let generation = process.generation();
        let mut ticker = interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the launcher already confirmed
        // health at startup, so an extra early probe is harmless.
        loop {
            ticker.tick().await;
            let outcome = process.health_check(check_timeout).await;
            let result = HealthCheckResult {
                agent_id: agent_id.clone(),
                generation,
                outcome,
                checked_at: Utc::now(),
            };
            if result_tx.send(result).await.is_err() {
                break;
            }
            if process.has_exited() {
                debug!(agent = %agent_id, "process exited, stopping monitor");
                break;
            }
        }
    })
}
