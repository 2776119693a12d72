//! Error types for the cord
//!
//! This module contains the error types used throughout the cord core,
//! including cryptographic errors, entry validation errors, storage errors,
//! transport errors, and the main CordError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, thiserror::Error)]
pub enum CryptographicError {
    #[error("No signing key registered for author {author}")]
    UnknownAuthor { author: String },
    #[error("Invalid key format: {reason}")]
    InvalidKeyFormat { reason: String },
    #[error("Signing failed for author {author}: {reason}")]
    SigningFailed { author: String, reason: String },
    #[error("Key generation failed: {reason}")]
    KeyGenerationFailed { reason: String },
    /// Our own freshly produced signature did not verify. Wrong key material
    /// or a canonical-encoding bug; never a data problem.
    #[error("Signature self-check failed for entry {entry_id} by {author}")]
    SelfCheckFailed { entry_id: String, author: String },
}

/// Specific entry validation error types
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("Unknown entry class: {value}")]
    UnknownClass { value: String },
    #[error("Invalid entry id {value}: {reason}")]
    InvalidEntryId { value: String, reason: String },
    #[error("Payload too large (max {max}, got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
    #[error("Logical clock exhausted for author {author}")]
    ClockExhausted { author: String },
}

/// Specific storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },
    #[error("Corrupt record {entry_id}: {reason}")]
    CorruptRecord { entry_id: String, reason: String },
    #[error("Entry {entry_id} not found")]
    NotFound { entry_id: String },
}

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send failed on {path}: {reason}")]
    SendFailed { path: String, reason: String },
    #[error("Transport timeout on {path} after {duration_ms}ms")]
    Timeout { path: String, duration_ms: u64 },
    #[error("Transport is not available: {path}")]
    Unavailable { path: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the cord
#[derive(Debug, thiserror::Error)]
pub enum CordError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Invalid entry: {0}")]
    InvalidEntry(#[from] EntryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel communication error between runtime tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl CordError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        CordError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        CordError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a storage backend error with a reason
    pub fn store_error<T: Into<String>>(reason: T) -> Self {
        CordError::Store(StoreError::Backend {
            reason: reason.into(),
        })
    }

    /// Create an unknown-author error
    pub fn unknown_author<A: Into<String>>(author: A) -> Self {
        CordError::Crypto(CryptographicError::UnknownAuthor {
            author: author.into(),
        })
    }

    /// Whether this error is the fatal signature self-check failure
    pub fn is_self_check_failure(&self) -> bool {
        matches!(
            self,
            CordError::Crypto(CryptographicError::SelfCheckFailed { .. })
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CordError>;
pub type CordResult<T> = Result<T>;
