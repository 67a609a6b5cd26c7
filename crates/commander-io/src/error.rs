//! Error types for the command/response engine.
//!
//! Errors are layered the same way the engine is: parameter marshalling
//! errors ([`ParameterError`]), transport errors ([`TransportError`]) and the
//! top-level [`CommanderError`] that `connect`, `disconnect` and `submit`
//! surface to callers.

use crate::parameter::ParameterKind;

/// Result alias for engine operations.
pub type CommanderResult<T> = Result<T, CommanderError>;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Marshalling and validation failures for a single value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    /// Argument count does not match the placeholders of a command template.
    #[error("Number of parameters does not match for '{command}': {expected} required, {actual} entered")]
    ArityMismatch {
        command: String,
        expected: usize,
        actual: usize,
    },

    /// The runtime type of a value does not match the declared type.
    #[error("{parameter} requires {expected}: {actual} entered")]
    TypeMismatch {
        parameter: String,
        expected: ParameterKind,
        actual: &'static str,
    },

    /// A wire string could not be parsed into the declared type.
    #[error("Wrong type for {parameter}: \"{input}\" is not a valid {kind}")]
    Parse {
        parameter: String,
        input: String,
        kind: ParameterKind,
    },

    /// A value lies outside the declared range.
    #[error("Out of range for {parameter}: \"{value}\" entered for range of {range}")]
    OutOfRange {
        parameter: String,
        value: String,
        range: String,
    },

    /// A placeholder refers to a parameter nobody defined.
    #[error("Parameter with name of {0} was not found")]
    UnknownParameter(String),
}

/// Failures raised by a [`CommandInterface`](crate::transport::CommandInterface).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operation attempted without an open connection
    #[error("Transport is not connected")]
    NotConnected,

    /// Socket or port I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reply did not complete before the configured timeout
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Nothing at all was received before the configured timeout
    #[error("Nothing was read from {endpoint} for {timeout_ms} milliseconds")]
    EmptyResponse { endpoint: String, timeout_ms: u64 },

    /// The remote end closed the connection
    #[error("Connection closed by {0}")]
    Closed(String),

    /// RPC command word has no entry in the method table
    #[error("Command <{0}> is not a valid remote method")]
    UnknownMethod(String),

    /// Remote call failed
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Callback listener was already started for this connection
    #[error("Callback listener is already running")]
    ListenerRunning,

    /// Transport settings cannot be used
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors surfaced by [`Commander`](crate::Commander).
#[derive(Debug, thiserror::Error)]
pub enum CommanderError {
    /// Schema is unusable (unknown parameter, malformed range, bad pattern...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Command key is not part of the schema
    #[error("Command \"{0}\" was not found in configuration")]
    UnknownCommand(String),

    /// Argument or reply value failed marshalling
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),

    /// Reply matched neither the happy nor the sad pattern
    #[error("Could not parse response as configured for {command}: {response:?}")]
    NoMatch { command: String, response: String },

    /// A reply arrived for a command without any response configuration
    #[error("Command \"{0}\" does not have any response configured")]
    NoResponseConfigured(String),

    /// `submit` called while disconnected
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Schema file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema document is not valid JSON for the expected shape
    #[error("Schema error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommanderError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_error_display() {
        let err = ParameterError::ArityMismatch {
            command: "move".to_string(),
            expected: 2,
            actual: 1,
        };
        assert!(err.to_string().contains("2 required, 1 entered"));

        let err = ParameterError::OutOfRange {
            parameter: "temp".to_string(),
            value: "400".to_string(),
            range: "[0,300]".to_string(),
        };
        assert!(err.to_string().contains("[0,300]"));
    }

    #[test]
    fn test_transport_error_wraps_into_commander_error() {
        let err: CommanderError = TransportError::Timeout(250).into();
        assert!(matches!(err, CommanderError::Transport(TransportError::Timeout(250))));
        assert_eq!(err.to_string(), "Operation timed out after 250ms");
    }

    #[test]
    fn test_parameter_error_wraps_into_commander_error() {
        let err: CommanderError = ParameterError::UnknownParameter("x".into()).into();
        assert!(matches!(err, CommanderError::InvalidParameter(_)));
    }
}
