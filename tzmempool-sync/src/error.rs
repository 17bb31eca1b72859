//! Error types for the sync layer.
//!
//! Every error raised while talking to the indexer or the nodes, decoding
//! their payloads, or writing to the ledger ends up here.

use thiserror::Error;

/// Errors that can occur in sync workers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport error from an HTTP or WebSocket endpoint.
    #[error("Transport error from {url}: {reason}")]
    Transport {
        /// Endpoint that failed
        url: String,
        /// Underlying error
        reason: String,
    },

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Endpoint that failed
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Request timed out after all attempts.
    #[error("Request to {url} timed out after {attempts} attempts")]
    Timeout {
        /// Endpoint that timed out
        url: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The node is behind the last confirmed level.
    #[error("Node {url} is stale: level {node_level}, confirmed level {confirmed_level}")]
    StaleNode {
        /// Node RPC endpoint
        url: String,
        /// Level reported by the node
        node_level: u64,
        /// Last level known to be confirmed
        confirmed_level: u64,
    },

    /// A required field is absent from a payload.
    #[error("Missing field '{field}' in {context}")]
    MissingField {
        /// Field name
        field: &'static str,
        /// What was being decoded
        context: &'static str,
    },

    /// A field has an unexpected JSON type.
    #[error("Field '{field}' in {context} is not a {expected}")]
    WrongType {
        /// Field name
        field: &'static str,
        /// What was being decoded
        context: &'static str,
        /// Expected type
        expected: &'static str,
    },

    /// Payload could not be decoded at all.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Database error.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker channel was closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Error from tzmempool-core.
    #[error("Core error: {0}")]
    Core(#[from] tzmempool_core::CoreError),
}

impl SyncError {
    /// Errors that go away by themselves and are retried on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::StaleNode { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
