//! Lifecycle event bus
//!
//! The supervisor announces agent lifecycle transitions here so unrelated
//! consumers (the HTTP layer, dashboards) can react without reaching into
//! supervisor state. Delivery is broadcast fan-out: a subscriber that
//! falls behind sees `Lagged` and misses events, which is acceptable for
//! decoupled observers - the authoritative state always lives with the
//! supervisor.

use crate::fleet::FleetHealthSummary;
use crate::protocol::AgentMetrics;
use serde::Serialize;
use tokio::sync::broadcast;

/// Event emitted by the supervisor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SupervisorEvent {
    /// Agent launched and confirmed healthy for the first time
    AgentStarted { id: String },
    /// Agent passed a health check after previously being in error
    AgentRecovered { id: String },
    /// Agent relaunched after a failure and confirmed healthy again
    AgentRestarted { id: String },
    /// Agent exhausted its restart budget and was parked in maintenance
    AgentFailed { id: String },
    /// Agent announced a change to its capability set
    CapabilityUpdate {
        id: String,
        capabilities: Vec<String>,
    },
    /// Agent pushed metrics outside the health-check cycle
    AgentMetrics { id: String, metrics: AgentMetrics },
    /// Periodic fleet-wide health snapshot
    FleetHealth { summary: FleetHealthSummary },
}

/// Broadcast bus for [`SupervisorEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SupervisorEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("no event subscribers: {}", e);
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
