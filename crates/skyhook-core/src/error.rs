//! Unified error handling for Skyhook.
//!
//! This module provides a common error type that can be used across all crates,
//! reducing boilerplate and making error handling consistent.

use crate::session::SessionState;
use uuid::Uuid;

/// Unified error type for Skyhook.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level errors (socket loss, broker rejection, publish failure).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound traffic rejected because the session is not connected.
    #[error("Not connected: session is {0}")]
    NotConnected(SessionState),

    /// Inbound payloads that could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A command received no reply within its window.
    #[error("Command '{method}' (tid {tid}) timed out after {waited_ms}ms")]
    CommandTimeout {
        tid: Uuid,
        method: String,
        waited_ms: u64,
    },

    /// A command was abandoned because its session was torn down.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_err {
    ($msg:expr) => {
        $crate::error::Error::Transport($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! storage_err {
    ($msg:expr) => {
        $crate::error::Error::Storage($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! decode_err {
    ($msg:expr) => {
        $crate::error::Error::Decode($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Decode(format!($fmt, $($arg)*))
    };
}

// Error conversion helpers
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

// Convenience constructors for common errors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for [`Error::CommandTimeout`].
    ///
    /// Dialect negotiation uses this to tell "no reply on that topic"
    /// apart from failures that should abort the probe entirely.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. })
    }
}

// Module re-export
pub use Error as SkyhookError;
