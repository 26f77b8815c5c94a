//! Error types for the ZNP client
//!
//! This module contains the error taxonomy used throughout the client:
//! link-layer failures, frame encode and decode failures, command
//! construction errors,
//! connection state machine violations, and the `ZnpError` type that unifies
//! them all.

use crate::types::CommandHeader;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport open/write failures
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open {device}: {reason}")]
    OpenFailed { device: String, reason: String },
    #[error("Not connected to a device")]
    NotConnected,
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },
    #[error("Connection closed: {reason}")]
    Closed { reason: String },
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound frames that cannot be turned into a known command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown command header {header}")]
    UnknownCommand { header: CommandHeader },
    #[error("Frame for {command} truncated while reading field {field}")]
    Truncated {
        command: &'static str,
        field: &'static str,
    },
    #[error("Frame for {command} has {count} trailing bytes")]
    TrailingBytes { command: &'static str, count: usize },
}

/// Outbound commands that do not fit the wire format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Field {field} of {command} is too long to encode ({length} bytes)")]
    FieldTooLong {
        command: &'static str,
        field: &'static str,
        length: usize,
    },
    #[error("Payload of {command} exceeds the frame limit ({length} bytes)")]
    PayloadTooLong { command: &'static str, length: usize },
}

/// Errors building commands or match specifications
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("{command} has no field named {field}")]
    UnknownField { command: &'static str, field: String },
    #[error("{command} is missing field {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command} field {field} given twice")]
    DuplicateField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command} field {field} expects {expected}, got {actual}")]
    TypeMismatch {
        command: &'static str,
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Rejected connection state machine transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid connection transition from {from} on {event}")]
pub struct StateTransitionError {
    pub from: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the ZNP client
#[derive(Debug, thiserror::Error)]
pub enum ZnpError {
    /// Listener or command call constructed incorrectly
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Wait or callback registered against a request
    #[error("Cannot listen for request {command}: only responses and callbacks can be awaited")]
    InvalidListenerTarget { command: &'static str },

    /// Non-request command passed where a request is required
    #[error("{command} is not a request")]
    InvalidRequest { command: &'static str },

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Pending wait cancelled, by the caller or by connection loss
    #[error("Listener was cancelled")]
    Cancelled,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ZnpError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ZnpError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from the elapsed bound
    pub fn timeout(duration: core::time::Duration) -> Self {
        ZnpError::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ZnpError::Cancelled)
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ZnpError>;
pub type ZnpResult<T> = Result<T>;
