//! Error types for the P2P callback bridge

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attach::AttachError;
use crate::engine::EngineError;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the bridge
///
/// Only `BindingIncomplete`, `Disposed` (from `bind`), `NotBound`,
/// `InvalidState`, `Engine` and `Config` are ever returned to a caller.
/// The rest are built on engine threads and handed to
/// [`ErrorReporter::report_error`](crate::ErrorReporter::report_error),
/// which delivers them to the receiver's `onError` as `CODE: description`.
#[derive(Debug, Error)]
pub enum Error {
    /// Null or zero-length buffer from the engine
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Frame dropped because mode/texture/binding does not allow delivery
    #[error("Routing suppressed: {0}")]
    RoutingSuppressed(String),

    /// Receiver lacks one or more required delivery methods
    #[error("Binding incomplete for receiver {receiver}: missing {}", missing.join(", "))]
    BindingIncomplete {
        /// Receiver identity
        receiver: String,
        /// Names of the delivery methods that could not be resolved
        missing: Vec<&'static str>,
    },

    /// The receiver's delivery method raised
    #[error("Managed call failed: {0}")]
    ManagedCall(String),

    /// The engine's stop call exceeded the configured threshold
    #[error("Stop timed out after {elapsed_ms}ms")]
    StopTimeout {
        /// Time waited before giving up on the stop call
        elapsed_ms: u64,
    },

    /// The session has been disposed
    #[error("Session disposed")]
    Disposed,

    /// Operation needs a bound receiver
    #[error("No receiver bound")]
    NotBound,

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Underlying engine call failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Managed context could not be acquired
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::RoutingSuppressed(_) => ErrorCode::RoutingSuppressed,
            Error::BindingIncomplete { .. } => ErrorCode::BindingIncomplete,
            Error::ManagedCall(_) => ErrorCode::ManagedCallFailure,
            Error::StopTimeout { .. } => ErrorCode::StopTimeout,
            Error::Disposed => ErrorCode::Disposed,
            Error::NotBound | Error::InvalidState(_) => ErrorCode::InvalidState,
            Error::Engine(_) => ErrorCode::EngineError,
            Error::Attach(_) => ErrorCode::AttachFailed,
            Error::Config(_) | Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => {
                ErrorCode::ConfigError
            }
            Error::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// Error codes surfaced to the receiver's error handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    RoutingSuppressed,
    BindingIncomplete,
    ManagedCallFailure,
    StopTimeout,
    Disposed,
    InvalidState,
    EngineError,
    AttachFailed,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::RoutingSuppressed => "ROUTING_SUPPRESSED",
            ErrorCode::BindingIncomplete => "BINDING_INCOMPLETE",
            ErrorCode::ManagedCallFailure => "MANAGED_CALL_FAILURE",
            ErrorCode::StopTimeout => "STOP_TIMEOUT",
            ErrorCode::Disposed => "DISPOSED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::AttachFailed => "ATTACH_FAILED",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
