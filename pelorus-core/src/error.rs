//! Error types for Pelorus operations

/// Result type for Pelorus operations
pub type Result<T> = std::result::Result<T, PelorusError>;

/// Error types shared across the Pelorus workspace
#[derive(Debug, thiserror::Error)]
pub enum PelorusError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Event bus error
    #[error("Event error: {0}")]
    Event(String),

    /// Metrics store error
    #[error("Metrics store error: {0}")]
    MetricsStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for PelorusError {
    fn from(s: String) -> Self {
        PelorusError::Other(s)
    }
}

impl From<&str> for PelorusError {
    fn from(s: &str) -> Self {
        PelorusError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for PelorusError {
    fn from(err: anyhow::Error) -> Self {
        PelorusError::Other(err.to_string())
    }
}

impl From<figment::Error> for PelorusError {
    fn from(err: figment::Error) -> Self {
        PelorusError::Configuration(err.to_string())
    }
}
