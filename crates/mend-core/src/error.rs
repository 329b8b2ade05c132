//! Unified error types for Mend

use thiserror::Error;

/// Unified error type for all Mend operations
#[derive(Error, Debug)]
pub enum MendError {
    // Git errors
    #[error("git command failed: {0}")]
    GitCommand(String),

    #[error("not a git repository: {0}")]
    NotARepository(String),

    // Agent runtime errors
    #[error("agent runtime error: {0}")]
    Runtime(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("fork failed: {0}")]
    Fork(String),

    // Orchestration errors
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("approval gate error: {0}")]
    Approval(String),

    #[error("triage error: {0}")]
    Triage(String),

    #[error("verification command error: {0}")]
    Verification(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using MendError
pub type Result<T> = std::result::Result<T, MendError>;
