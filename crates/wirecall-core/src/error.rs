//! Error types for wirecall.
//!
//! Errors fall into two groups. Per-call errors (`NotFound`, `Invocation`,
//! `Arguments`, `Filter`, `Protocol`) are isolated to one message and become an
//! error reply. Connection-level errors (`Framing`, `Io`, `ConnectionClosed`)
//! end the receive loop and tear the session down.

use std::time::Duration;
use thiserror::Error;

/// Boxed error used for failures raised by user-supplied action bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for wirecall.
#[derive(Debug, Error)]
pub enum WirecallError {
    // Registration errors
    #[error("Action already registered: {name}")]
    DuplicateName { name: String },

    #[error("Correlation id already pending: {0}")]
    DuplicateCorrelationId(u64),

    // Dispatch errors
    #[error("Action not found: {name}")]
    NotFound { name: String },

    #[error("Action {action} failed: {message}")]
    Invocation {
        action: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid arguments for {action}: {message}")]
    Arguments { action: String, message: String },

    #[error("Filter {filter} failed: {message}")]
    Filter { filter: String, message: String },

    // Codec errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Framing error: {message}")]
    Framing { message: String },

    // Call outcome errors
    #[error("Remote error ({code}): {message}")]
    Remote { code: i32, message: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    // Session errors
    #[error("Session is not connected")]
    NotConnected,

    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("No remote endpoint known for this session")]
    NoEndpoint,

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for wirecall operations.
pub type Result<T> = std::result::Result<T, WirecallError>;

impl From<std::io::Error> for WirecallError {
    fn from(err: std::io::Error) -> Self {
        WirecallError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for WirecallError {
    fn from(err: serde_json::Error) -> Self {
        WirecallError::Serialization {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl WirecallError {
    /// Wrap a failure raised by an action body, keeping the original cause.
    pub fn invocation(action: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        WirecallError::Invocation {
            action: action.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a serialization error without an underlying serde cause.
    pub fn serialization(message: impl Into<String>) -> Self {
        WirecallError::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Convert to a JSON-RPC error code carried by error replies.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Connectivity error
    /// - -32001: Rejected by a filter
    /// - -32002: Timed out
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            WirecallError::Protocol { .. } | WirecallError::Framing { .. } => -32700,

            WirecallError::NotFound { .. } => -32601,

            WirecallError::Arguments { .. } | WirecallError::Serialization { .. } => -32602,

            WirecallError::Remote { code, .. } => *code,

            WirecallError::ConnectionClosed
            | WirecallError::NotConnected
            | WirecallError::ConnectFailed { .. }
            | WirecallError::NoEndpoint
            | WirecallError::Io { .. } => -32000,

            WirecallError::Filter { .. } => -32001,

            WirecallError::Timeout(_) => -32002,

            _ => -32603,
        }
    }

    /// Whether this error means the underlying connection is unusable.
    ///
    /// Connection-level errors terminate the receive loop; everything else
    /// is isolated to the message that caused it.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            WirecallError::Framing { .. }
                | WirecallError::Io { .. }
                | WirecallError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WirecallError::NotFound {
            name: "Echo".into(),
        };
        assert_eq!(err.to_string(), "Action not found: Echo");

        let err = WirecallError::Remote {
            code: -32603,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Remote error (-32603): boom");
    }

    #[test]
    fn test_invocation_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = WirecallError::invocation("Save", cause);

        assert_eq!(err.to_string(), "Action Save failed: disk on fire");
        let source = std::error::Error::source(&err).expect("cause should be preserved");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            WirecallError::NotFound { name: "x".into() }.to_rpc_error_code(),
            -32601
        );
        assert_eq!(
            WirecallError::Arguments {
                action: "x".into(),
                message: "y".into()
            }
            .to_rpc_error_code(),
            -32602
        );
        assert_eq!(
            WirecallError::Remote {
                code: 7,
                message: "z".into()
            }
            .to_rpc_error_code(),
            7
        );
        assert_eq!(WirecallError::Other("x".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_connection_level_classification() {
        assert!(WirecallError::Framing {
            message: "bad length".into()
        }
        .is_connection_level());
        assert!(WirecallError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_connection_level());
        assert!(!WirecallError::Protocol {
            message: "bad json".into()
        }
        .is_connection_level());
        assert!(!WirecallError::NotFound { name: "x".into() }.is_connection_level());
    }
}
