//! Error types for the SDUX session runtime.

use thiserror::Error;

use crate::{ProcessId, SessionPhase};

/// Main error type for session runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Executable missing, not executable, or the OS refused to create the process
    #[error("Failed to spawn '{app_id}': {reason}")]
    SpawnError {
        /// Application identifier
        app_id: String,
        /// OS-level reason
        reason: String,
    },

    /// Launch id not present in the registry
    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    /// Unlock credential rejected
    #[error("Authentication denied")]
    AuthDenied,

    /// No managed process with this id
    #[error("No such process: {0}")]
    NoSuchProcess(ProcessId),

    /// Operation did not complete in time
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Display server connection is gone
    #[error("Windowing connection lost: {0}")]
    WindowingConnectionLost(String),

    /// Session bus could not be reached or bound
    #[error("Message bus unavailable: {0}")]
    MessageBusUnavailable(String),

    /// Operation not allowed in the current session phase
    #[error("Cannot {operation} while session is {phase}")]
    InvalidPhase {
        /// Current phase
        phase: SessionPhase,
        /// Rejected operation
        operation: &'static str,
    },

    /// Session state consistency check failed
    #[error("Session invariant violated: {0}")]
    InvariantViolation(String),

    /// The dispatcher is no longer running
    #[error("Session dispatcher has shut down")]
    SessionClosed,

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Stable failure name used on the session bus.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SpawnError { .. } => "SpawnError",
            Error::UnknownApplication(_) => "UnknownApplication",
            Error::AuthDenied => "AuthDenied",
            Error::NoSuchProcess(_) => "NoSuchProcess",
            Error::Timeout(_) => "Timeout",
            Error::WindowingConnectionLost(_) => "WindowingConnectionLost",
            Error::MessageBusUnavailable(_) => "MessageBusUnavailable",
            Error::InvalidPhase { .. } => "InvalidPhase",
            Error::InvariantViolation(_) => "InvariantViolation",
            Error::SessionClosed => "SessionClosed",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::Io(_) | Error::Serialization(_) | Error::Yaml(_) => "InternalError",
            Error::Config(_) => "ConfigError",
        }
    }

    /// Whether this error ends the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WindowingConnectionLost(_) | Error::InvariantViolation(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
