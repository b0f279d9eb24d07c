use pidmon_agent::AgentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PidmonError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid usage: {0}")]
    UsageError(String),

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Unsupported feature on this system: {0}")]
    UnsupportedFeature(String),

    #[error("{failed} of {total} reports failed")]
    ReportsFailed { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, PidmonError>;
