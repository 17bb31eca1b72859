//! Error types for the tzmempool core library.
//!
//! This module defines the errors raised while decoding base58check
//! values, forging bytes, and configuring core structures.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Base58check decoding failed (bad alphabet or checksum).
    #[error("Invalid base58check string '{input}': {reason}")]
    InvalidBase58 {
        /// The offending input
        input: String,
        /// Why decoding failed
        reason: String,
    },

    /// The decoded value does not start with the expected prefix.
    #[error("Value '{input}' does not carry the '{expected}' prefix")]
    UnexpectedPrefix {
        /// The offending input
        input: String,
        /// Textual prefix that was expected
        expected: &'static str,
    },

    /// The decoded payload has the wrong size.
    #[error("Payload of '{input}' is {actual} bytes, expected {expected}")]
    InvalidLength {
        /// The offending input
        input: String,
        /// Expected payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// A level does not fit the 4-byte forged representation.
    #[error("Level {0} does not fit into a forged int32")]
    LevelOverflow(u64),

    /// Unknown operation kind tag.
    #[error("Unknown operation kind: '{0}'")]
    UnknownKind(String),

    /// Unknown operation status.
    #[error("Unknown operation status: '{0}'")]
    UnknownStatus(String),

    /// Configuration error (empty kind list, zero capacity, ...).
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidLength {
            input: "Bxyz".to_string(),
            expected: 32,
            actual: 31,
        };
        assert!(err.to_string().contains("31 bytes"));
        assert!(err.to_string().contains("expected 32"));
    }

    #[test]
    fn test_level_overflow_error() {
        let err = CoreError::LevelOverflow(u64::MAX);
        assert!(err.to_string().contains("int32"));
    }
}
