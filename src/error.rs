//! Error types for the link layer.

use std::io;
use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur while supervising a connection or exchanging data.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid or rejected configuration.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the configuration problem.
        reason: String,
    },

    /// A value's tag does not match the wire type it is being converted to.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Wire type the conversion expected.
        expected: String,
        /// Tag of the value actually supplied.
        actual: String,
    },

    /// A raw buffer is too short for the requested wire type.
    #[error("Buffer too short: needed {needed} bytes, got {got}")]
    ShortBuffer {
        /// Bytes required by the wire type.
        needed: usize,
        /// Bytes available in the buffer.
        got: usize,
    },

    /// Transport-level failure reported by the protocol client.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },

    /// Communication timeout.
    #[error("Communication timeout")]
    Timeout,

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Creates a new `Config` error.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_link::LinkError;
    ///
    /// let err = LinkError::config("invalid IP address '10.0.0'");
    /// ```
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a new `TypeMismatch` error.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_link::LinkError;
    ///
    /// let err = LinkError::type_mismatch("Real", "Bit");
    /// ```
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `ShortBuffer` error.
    pub fn short_buffer(needed: usize, got: usize) -> Self {
        Self::ShortBuffer { needed, got }
    }

    /// Creates a new `Transport` error.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_link::LinkError;
    ///
    /// let err = LinkError::transport("connection refused");
    /// ```
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}
