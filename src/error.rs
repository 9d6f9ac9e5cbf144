//! Unified error types for Flotilla

use crate::agent::AgentId;
use crate::snapshot::SnapshotId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Flotilla operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Monitoring errors
    #[error("No agent state source attached, detection unavailable")]
    DetectionUnavailable,

    #[error("Agent {0} is not tracked")]
    AgentNotFound(AgentId),

    // Recovery errors
    #[error("Recovery exhausted for agent {agent} after {attempts} attempts")]
    RecoveryExhausted { agent: AgentId, attempts: u32 },

    #[error("Recovery handler failed for agent {agent}: {message}")]
    RecoveryHandler { agent: AgentId, message: String },

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    // Snapshot errors
    #[error("Snapshot '{snapshot}' not found for agent {agent}")]
    SnapshotNotFound { agent: AgentId, snapshot: String },

    #[error("System snapshot '{0}' not found")]
    SystemSnapshotNotFound(SnapshotId),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for Flotilla operations
pub type Result<T> = std::result::Result<T, Error>;
