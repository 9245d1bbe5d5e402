//! Error types for multihome.

use std::io;

use thiserror::Error;

/// Result type alias for multihome operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for multihome.
#[derive(Error, Debug)]
pub enum Error {
    // Discovery and health-check errors
    #[error("provider error: {0}")]
    Provider(String),

    #[error("check failed for source {source_name}: {reason}")]
    CheckFailed { source_name: String, reason: String },

    #[error("source {0} not found")]
    SourceNotFound(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    // Dial errors
    #[error("dial {network} {address} via {source_name} failed: {reason}")]
    DialFailed {
        source_name: String,
        network: String,
        address: String,
        reason: String,
    },

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    // Store and policy errors
    #[error("validation error: {0}")]
    Policy(#[from] PolicyError),

    #[error("policy {0} not found")]
    PolicyNotFound(String),

    #[error("policy {0} already exists")]
    PolicyConflict(String),

    #[error("no source available for {target}")]
    NoSourceAvailable { target: String },

    // Lifecycle
    #[error("operation cancelled")]
    Cancelled,

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Policy validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("source_id cannot be empty")]
    EmptySourceId,

    #[error("target cannot be empty")]
    EmptyTarget,
}

impl Error {
    /// Check if error is transient (the reconciliation loop should keep going).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Provider(_)
                | Error::CheckFailed { .. }
                | Error::Timeout(_)
                | Error::DialFailed { .. }
                | Error::Io(_)
        )
    }

    /// Check if error was caused by bad caller input rather than the daemon.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Policy(_) | Error::PolicyNotFound(_) | Error::PolicyConflict(_)
        )
    }
}
