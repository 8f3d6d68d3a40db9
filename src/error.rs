//! Error types for a3s-pii

use thiserror::Error;

/// Errors that can occur while tokenizing, redacting, or restoring text
#[derive(Debug, Error)]
pub enum PiiError {
    /// Policy name not present in the built-in table
    #[error("Unknown policy: '{0}'")]
    UnknownPolicy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity span does not describe a valid slice of the source text
    #[error("Invalid entity span {start}..{end}: {reason}")]
    InvalidSpan {
        start: usize,
        end: usize,
        reason: String,
    },

    /// Entity type name that would not survive a token round trip
    #[error("Invalid entity type '{0}': not a canonical type name")]
    InvalidEntityType(String),

    /// String is not a well-formed `<Type_N>` token
    #[error("Invalid token '{0}'")]
    InvalidToken(String),

    /// External detector failure (network, model, cancellation)
    #[error("Detection failed: {0}")]
    Detection(String),

    /// Registry internal failure (poisoned lock, corrupt snapshot)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Imported pair contradicts an existing registry binding
    #[error("Registry conflict on token '{token}': {reason}")]
    RegistryConflict {
        token: String,
        reason: String,
    },

    /// An assigned token already occurs literally in the source text
    #[error("Token '{0}' already occurs in the source text")]
    TokenCollision(String),

    /// Persistence backend failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot encryption or decryption failure
    #[error("Encryption error: {0}")]
    Encryption(String),
}

/// Result type alias for PII operations
pub type Result<T> = std::result::Result<T, PiiError>;
