//! Error types for supervisor operations

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Unknown agent: {0}")]
    AgentNotFound(String),

    #[error("Failed to launch agent {agent}: {source}")]
    Launch {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent {0} did not become healthy within the startup window")]
    StartupTimeout(String),

    #[error("Message channel to agent {0} is closed")]
    ChannelClosed(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Core(#[from] pelorus_core::error::PelorusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
