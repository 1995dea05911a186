//! Error types for the courier runtime

use thiserror::Error;

use crate::codec::DecodeError;
use crate::constraint::ConstraintViolation;

/// Lifecycle failure kinds for stop/drain operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleErrorKind {
    /// The operation was interrupted (e.g. the connection closed underneath
    /// an in-flight drain)
    Interrupted,
    /// The drain did not complete within the requested timeout
    DrainTimeout,
    /// The listener or connection was already closed
    AlreadyClosed,
}

impl std::fmt::Display for LifecycleErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleErrorKind::Interrupted => write!(f, "interrupted"),
            LifecycleErrorKind::DrainTimeout => write!(f, "drain timeout"),
            LifecycleErrorKind::AlreadyClosed => write!(f, "already closed"),
        }
    }
}

/// Main error type for courier operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection establishment errors (certificates, I/O, bad options)
    #[error("Connection setup error: {message}")]
    ConnectionSetup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Errors on an established connection (publish/request/subscribe)
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload bytes could not be decoded to the declared parameter type
    #[error("Payload binding error on subject '{subject}'")]
    PayloadBinding {
        subject: String,
        #[source]
        source: DecodeError,
    },

    /// Payload decoded but failed its declared constraints
    #[error("Payload validation error on subject '{subject}'")]
    PayloadValidation {
        subject: String,
        #[source]
        source: ConstraintViolation,
    },

    /// The user handler raised or returned an error
    #[error("Handler invocation error in service '{service}': {message}")]
    HandlerInvocation {
        service: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Interrupted/timeout/already-closed during stop or drain
    #[error("Lifecycle error ({kind}): {message}")]
    Lifecycle {
        kind: LifecycleErrorKind,
        message: String,
    },

    /// Configuration errors (missing subject, duplicate attach, bad config)
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Internal contract violations (e.g. duplicate payload parameter in a
    /// handler signature that bypassed the static validator)
    #[error("Contract violation: {message}")]
    Contract { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },
}

impl Error {
    /// Create a connection setup error with source
    pub fn connection_setup<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionSetup {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection setup error without source
    pub fn connection_setup_msg(message: impl Into<String>) -> Self {
        Self::ConnectionSetup {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without source
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a payload binding error
    pub fn payload_binding(subject: impl Into<String>, source: DecodeError) -> Self {
        Self::PayloadBinding {
            subject: subject.into(),
            source,
        }
    }

    /// Create a payload validation error
    pub fn payload_validation(subject: impl Into<String>, source: ConstraintViolation) -> Self {
        Self::PayloadValidation {
            subject: subject.into(),
            source,
        }
    }

    /// Create a handler invocation error from the handler's own error value
    pub fn handler<E>(service: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::HandlerInvocation {
            service: service.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a handler invocation error without source
    pub fn handler_msg(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerInvocation {
            service: service.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(kind: LifecycleErrorKind, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field,
        }
    }

    /// Create an internal contract violation error
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectionSetup { .. } => true,
            Error::Connection { .. } => true,
            Error::Timeout { .. } => true,
            Error::PayloadBinding { .. } => false,
            Error::PayloadValidation { .. } => false,
            Error::HandlerInvocation { .. } => false,
            Error::Lifecycle { .. } => false,
            Error::Configuration { .. } => false,
            Error::Contract { .. } => false,
        }
    }

    /// Get error category for debugging and metrics tagging
    pub fn category(&self) -> &'static str {
        match self {
            Error::ConnectionSetup { .. } => "connection_setup",
            Error::Connection { .. } => "connection",
            Error::PayloadBinding { .. } => "payload_binding",
            Error::PayloadValidation { .. } => "payload_validation",
            Error::HandlerInvocation { .. } => "handler_invocation",
            Error::Lifecycle { .. } => "lifecycle",
            Error::Configuration { .. } => "configuration",
            Error::Contract { .. } => "contract",
            Error::Timeout { .. } => "timeout",
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::handler_msg("unknown", format!("handler task failed: {err}"))
    }
}

/// Result type for courier operations
pub type Result<T> = std::result::Result<T, Error>;
