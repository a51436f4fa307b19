//! Configuration types for the Pelorus fleet

use crate::error::{PelorusError, Result};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level fleet configuration, supplied at process start
///
/// The agent list is ordered: `initialize` launches agents in the order
/// they appear here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    /// Supervisor-wide settings
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Ordered list of agents to supervise
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// Supervisor-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// How long a newly launched agent gets to report healthy
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Grace period between the shutdown message and a force kill
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Interval between fleet-wide health aggregations
    #[serde(with = "humantime_serde")]
    pub aggregation_interval: Duration,

    /// Event bus buffer size
    pub event_buffer_size: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            aggregation_interval: Duration::from_secs(15),
            event_buffer_size: 128,
        }
    }
}

/// Static configuration for one supervised agent; never mutated after boot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent id (e.g. "weather", "tidal")
    pub id: String,

    /// Human-readable name for dashboards
    #[serde(default)]
    pub name: String,

    /// Executable to launch
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Interval between health checks
    #[serde(with = "humantime_serde", default = "default_health_check_interval")]
    pub health_check_interval: Duration,

    /// How long a single health check may take before it counts as failed
    #[serde(with = "humantime_serde", default = "default_health_check_timeout")]
    pub health_check_timeout: Duration,

    /// Automatic relaunches permitted before the agent is parked in
    /// maintenance
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before a scheduled relaunch
    #[serde(with = "humantime_serde", default = "default_restart_delay")]
    pub restart_delay: Duration,

    /// Whether a voluntary exit with code 0 is treated as a failure.
    /// `true` matches the historical behavior of restarting on any exit;
    /// with `false` a clean exit parks the agent in `Stopped` instead.
    #[serde(default = "default_restart_on_clean_exit")]
    pub restart_on_clean_exit: bool,
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_on_clean_exit() -> bool {
    true
}

impl AgentConfig {
    /// Minimal config with defaults, mostly useful in tests
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            health_check_interval: default_health_check_interval(),
            health_check_timeout: default_health_check_timeout(),
            max_restarts: default_max_restarts(),
            restart_delay: default_restart_delay(),
            restart_on_clean_exit: default_restart_on_clean_exit(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file, with `PELORUS_` environment
    /// variables layered on top (e.g. `PELORUS_SUPERVISOR__SHUTDOWN_GRACE`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: FleetConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PELORUS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the supervisor depends on
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(PelorusError::Configuration(
                    "agent id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(PelorusError::Configuration(format!(
                    "duplicate agent id: {}",
                    agent.id
                )));
            }
            if agent.command.is_empty() {
                return Err(PelorusError::Configuration(format!(
                    "agent {} has an empty command",
                    agent.id
                )));
            }
            if agent.health_check_timeout.is_zero() || agent.health_check_interval.is_zero() {
                return Err(PelorusError::Configuration(format!(
                    "agent {} has a zero health-check interval or timeout",
                    agent.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.startup_timeout, Duration::from_secs(30));
        assert_eq!(settings.shutdown_grace, Duration::from_secs(10));

        let agent = AgentConfig::new("weather", "weather-agent");
        assert_eq!(agent.max_restarts, 3);
        assert!(agent.restart_on_clean_exit);
    }

    #[test]
    fn parses_toml() {
        let config: FleetConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [supervisor]
                startup_timeout = "20s"
                shutdown_grace = "5s"
                aggregation_interval = "10s"
                event_buffer_size = 64

                [[agents]]
                id = "weather"
                name = "Weather lookup"
                command = "weather-agent"
                args = ["--region", "north-sea"]
                health_check_interval = "10s"
                health_check_timeout = "2s"
                max_restarts = 5
                restart_delay = "100ms"

                [[agents]]
                id = "tidal"
                command = "tide-agent"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.supervisor.startup_timeout, Duration::from_secs(20));
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].id, "weather");
        assert_eq!(config.agents[0].restart_delay, Duration::from_millis(100));
        // Unspecified fields fall back to defaults
        assert_eq!(config.agents[1].max_restarts, 3);
        assert_eq!(
            config.agents[1].health_check_interval,
            Duration::from_secs(15)
        );
        config.validate().unwrap();
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pelorus.toml");
        std::fs::write(
            &path,
            r#"
            [[agents]]
            id = "weather"
            command = "weather-agent"
            "#,
        )
        .unwrap();

        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].id, "weather");
        assert_eq!(config.supervisor.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let config = FleetConfig {
            supervisor: SupervisorSettings::default(),
            agents: vec![
                AgentConfig::new("weather", "weather-agent"),
                AgentConfig::new("weather", "other-agent"),
            ],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate agent id"));
    }

    #[test]
    fn rejects_empty_command() {
        let config = FleetConfig {
            supervisor: SupervisorSettings::default(),
            agents: vec![AgentConfig::new("weather", "")],
        };
        assert!(config.validate().is_err());
    }
}
