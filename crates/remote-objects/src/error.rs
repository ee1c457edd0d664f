//! Error types for the remote object engine.
//!
//! Every failure that can happen while serving an inbound call is converted to
//! an [`ErrorValue`] and shipped back to the caller inside an error `Return`,
//! where [`RpcError::from_error_value`] re-raises it as the matching variant.

use core::fmt;
use std::io;

use thiserror::Error;

use crate::wire::ErrorValue;

/// Remote object engine error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Malformed frame, unknown envelope tag or unexpected message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An object id that was never exported (or was already released).
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// The target object does not answer the requested method.
    #[error("No such method: {0}")]
    NoSuchMethod(String),

    /// The security policy or the internal-call marker rejected a method.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// The invoked method itself failed.
    #[error("{kind}: {message}")]
    Application {
        /// Error kind as reported by the raising side.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// Transport failure or peer disconnect.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification of [`RpcError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Wire-level violations
    Protocol = 0,
    /// Object identity errors
    Reference = 1,
    /// Dispatch errors (missing methods)
    Dispatch = 2,
    /// Policy rejections
    Security = 3,
    /// Errors raised by application code
    Application = 4,
    /// Transport errors
    Connection = 5,
    /// Configuration errors
    Config = 6,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Reference => write!(f, "Reference"),
            ErrorCategory::Dispatch => write!(f, "Dispatch"),
            ErrorCategory::Security => write!(f, "Security"),
            ErrorCategory::Application => write!(f, "Application"),
            ErrorCategory::Connection => write!(f, "Connection"),
            ErrorCategory::Config => write!(f, "Config"),
        }
    }
}

/// Wire names of the engine's own error kinds.
pub mod kinds {
    /// [`super::RpcError::Protocol`]
    pub const PROTOCOL: &str = "ProtocolError";
    /// [`super::RpcError::ReferenceNotFound`]
    pub const REFERENCE_NOT_FOUND: &str = "ReferenceNotFoundError";
    /// [`super::RpcError::NoSuchMethod`]
    pub const NO_SUCH_METHOD: &str = "NoSuchMethodError";
    /// [`super::RpcError::SecurityViolation`]
    pub const SECURITY_VIOLATION: &str = "SecurityViolationError";
    /// [`super::RpcError::Connection`]
    pub const CONNECTION: &str = "ConnectionError";
    /// [`super::RpcError::InvalidConfig`]
    pub const INVALID_CONFIG: &str = "ConfigError";
    /// Default kind for application failures without a more specific name.
    pub const RUNTIME: &str = "RuntimeError";
    /// Bad arguments passed to an exported method.
    pub const ARGUMENT: &str = "ArgumentError";
}

impl RpcError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        RpcError::Protocol(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        RpcError::Connection(msg.into())
    }

    /// Create a reference error.
    pub fn reference_not_found(msg: impl Into<String>) -> Self {
        RpcError::ReferenceNotFound(msg.into())
    }

    /// Create a security violation for `method`.
    pub fn security_violation(method: &str) -> Self {
        RpcError::SecurityViolation(format!("insecure method '{method}' called"))
    }

    /// Create a missing method error for `method`.
    pub fn no_such_method(method: &str) -> Self {
        RpcError::NoSuchMethod(format!(
            "undefined or private remote method '{method}' called"
        ))
    }

    /// Create an application error of an arbitrary kind.
    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Application {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an application error for bad arguments.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::application(kinds::ARGUMENT, message)
    }

    /// Create an application error with the generic runtime kind.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::application(kinds::RUNTIME, message)
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::Protocol(_) => ErrorCategory::Protocol,
            RpcError::ReferenceNotFound(_) => ErrorCategory::Reference,
            RpcError::NoSuchMethod(_) => ErrorCategory::Dispatch,
            RpcError::SecurityViolation(_) => ErrorCategory::Security,
            RpcError::Application { .. } => ErrorCategory::Application,
            RpcError::Connection(_) => ErrorCategory::Connection,
            RpcError::InvalidConfig(_) => ErrorCategory::Config,
        }
    }

    /// Check if this error ends the connection it happened on.
    ///
    /// Everything else is delivered to the caller as an error `Return`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::Protocol(_) | RpcError::Connection(_))
    }

    /// Wire name of this error's kind.
    pub fn kind(&self) -> &str {
        match self {
            RpcError::Protocol(_) => kinds::PROTOCOL,
            RpcError::ReferenceNotFound(_) => kinds::REFERENCE_NOT_FOUND,
            RpcError::NoSuchMethod(_) => kinds::NO_SUCH_METHOD,
            RpcError::SecurityViolation(_) => kinds::SECURITY_VIOLATION,
            RpcError::Application { kind, .. } => kind,
            RpcError::Connection(_) => kinds::CONNECTION,
            RpcError::InvalidConfig(_) => kinds::INVALID_CONFIG,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RpcError::Protocol(m)
            | RpcError::ReferenceNotFound(m)
            | RpcError::NoSuchMethod(m)
            | RpcError::SecurityViolation(m)
            | RpcError::Connection(m)
            | RpcError::InvalidConfig(m) => m,
            RpcError::Application { message, .. } => message,
        }
    }

    /// Convert into the by-value form carried by an error `Return`.
    pub fn to_error_value(&self) -> ErrorValue {
        ErrorValue::new(self.kind(), self.message())
    }

    /// Re-raise an error received from the peer.
    pub fn from_error_value(value: ErrorValue) -> Self {
        let ErrorValue { kind, message } = value;
        match kind.as_str() {
            kinds::PROTOCOL => RpcError::Protocol(message),
            kinds::REFERENCE_NOT_FOUND => RpcError::ReferenceNotFound(message),
            kinds::NO_SUCH_METHOD => RpcError::NoSuchMethod(message),
            kinds::SECURITY_VIOLATION => RpcError::SecurityViolation(message),
            kinds::CONNECTION => RpcError::Connection(message),
            kinds::INVALID_CONFIG => RpcError::InvalidConfig(message),
            _ => RpcError::Application { kind, message },
        }
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        RpcError::Connection(e.to_string())
    }
}

/// Specialized Result type for remote object operations
pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_fatal() {
        assert!(RpcError::protocol("bad tag").is_fatal());
        assert!(RpcError::connection("reset").is_fatal());
        assert!(!RpcError::security_violation("send").is_fatal());
        assert!(!RpcError::runtime("boom").is_fatal());
    }

    #[test]
    fn test_error_value_reraises_same_variant() {
        let errors = [
            RpcError::protocol("p"),
            RpcError::reference_not_found("r"),
            RpcError::no_such_method("frobnicate"),
            RpcError::security_violation("send"),
            RpcError::connection("c"),
            RpcError::argument("expected 2 arguments"),
        ];
        for err in errors {
            let back = RpcError::from_error_value(err.to_error_value());
            assert_eq!(back, err);
        }
    }

    #[test]
    fn test_unknown_kind_becomes_application() {
        let err = RpcError::from_error_value(ErrorValue::new("ZeroDivisionError", "divided by 0"));
        assert_eq!(err.category(), ErrorCategory::Application);
        assert_eq!(err.to_string(), "ZeroDivisionError: divided by 0");
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let err: RpcError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.is_fatal());
    }
}
