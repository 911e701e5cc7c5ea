//! Error types for state storage operations.
//!
//! Read paths fail open (they log and fall back to a default), so most of
//! these surface only from writes, removes and the explicit `try_*` calls.

use thiserror::Error;

/// Errors that can occur during state storage operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// A value could not be encoded to the wire format.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored text could not be decoded back into a value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Codec failure attributed to a specific logical key.
    #[error("codec error for key {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: Box<StateError>,
    },

    /// The backend rejected a write.
    #[error("storage write failed for key {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: Box<StateError>,
    },

    /// Storage is full, no space remaining.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// A migration function rejected the stored value.
    #[error("migration from version {from} failed: {reason}")]
    Migration { from: u32, reason: String },

    /// Cannot connect to or communicate with storage backend.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A background watch task could not be started.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    /// Wrap a codec error with the key it was raised for.
    pub fn codec(key: impl Into<String>, source: StateError) -> Self {
        StateError::Codec {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a backend error raised while writing `key`.
    pub fn write(key: impl Into<String>, source: StateError) -> Self {
        StateError::StorageWrite {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if the backend ran out of space, directly or wrapped.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            StateError::StorageFull(_) => true,
            StateError::StorageWrite { source, .. } => source.is_quota_exceeded(),
            _ => false,
        }
    }
}
