//! Wire protocol between the supervisor and agent processes
//!
//! Messages travel as JSON Lines over the agent's stdio: one JSON object
//! per line, tagged with a `type` discriminator. The channel is in-order
//! per direction and makes no delivery guarantee across a process crash -
//! a crash mid-flight surfaces as a health-check timeout or a process-exit
//! event, both of which the supervisor already handles.
//!
//! Health checks carry a correlation id so a late reply from a slow check
//! can never be mistaken for the answer to a newer one.

use serde::{Deserialize, Serialize};

/// A control message exchanged with an agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentMessage {
    /// Liveness probe (coordinator -> agent)
    HealthCheck {
        /// Correlation id echoed back in the response
        id: u64,
    },

    /// Reply to a liveness probe (agent -> coordinator)
    HealthResponse {
        /// Correlation id of the originating check
        id: u64,
        metrics: AgentMetrics,
    },

    /// The agent's current tool/capability set changed (agent -> coordinator).
    /// Forwarded as an event; the supervisor does not interpret it.
    CapabilityUpdate { capabilities: Vec<String> },

    /// Out-of-band metrics push outside the health-check cycle
    /// (agent -> coordinator)
    Metrics { metrics: AgentMetrics },

    /// Structured log line, re-emitted through the coordinator's logging
    /// sink at the carried severity (agent -> coordinator)
    Log { level: LogLevel, message: String },

    /// Request voluntary termination (coordinator -> agent)
    Shutdown,
}

/// Resource and throughput metrics reported by an agent
///
/// Field names stay camelCase on the wire; the dashboards and the agents'
/// SDKs already speak that dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    /// CPU usage fraction (0.0 - 1.0)
    pub cpu: f64,
    /// Resident memory in megabytes
    pub memory: f64,
    /// Requests processed since launch
    pub requests_processed: u64,
    /// Average response time in milliseconds
    pub average_response_time: f64,
}

/// Severity carried by [`AgentMessage::Log`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AgentMessage {
    /// Serialize to a single JSON line (no trailing newline)
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one line of agent stdout into a message
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_wire_format() {
        let line = AgentMessage::HealthCheck { id: 7 }.to_line().unwrap();
        assert_eq!(line, r#"{"type":"health-check","id":7}"#);
    }

    #[test]
    fn health_response_round_trip() {
        let msg = AgentMessage::HealthResponse {
            id: 42,
            metrics: AgentMetrics {
                cpu: 0.25,
                memory: 128.0,
                requests_processed: 900,
                average_response_time: 12.5,
            },
        };
        let line = msg.to_line().unwrap();
        assert!(line.contains(r#""type":"health-response""#));
        assert!(line.contains(r#""requestsProcessed":900"#));
        assert!(line.contains(r#""averageResponseTime":12.5"#));
        assert_eq!(AgentMessage::from_line(&line).unwrap(), msg);
    }

    #[test]
    fn shutdown_has_no_payload() {
        let line = AgentMessage::Shutdown.to_line().unwrap();
        assert_eq!(line, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn parses_capability_update() {
        let msg = AgentMessage::from_line(
            r#"{"type":"capability-update","capabilities":["tides","currents"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            AgentMessage::CapabilityUpdate {
                capabilities: vec!["tides".to_string(), "currents".to_string()],
            }
        );
    }

    #[test]
    fn parses_log_severity() {
        let msg =
            AgentMessage::from_line(r#"{"type":"log","level":"warn","message":"slow tide table"}"#)
                .unwrap();
        match msg {
            AgentMessage::Log { level, message } => {
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(message, "slow tide table");
            }
            other => panic!("expected log message, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(AgentMessage::from_line(r#"{"type":"teleport"}"#).is_err());
        assert!(AgentMessage::from_line("not json at all").is_err());
    }
}
