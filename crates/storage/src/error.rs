//! Storage error types and result alias.
//!
//! Every backend maps its failures onto [`StorageError`]. The only error a
//! caller is expected to handle in normal operation is
//! [`StorageError::BadIdentifier`], raised by
//! [`consume`](crate::SignedUrlStorage::consume) whenever an identifier does
//! not resolve to a usable record. The remaining variants are backend faults.
//!
//! # Error Types
//!
//! - [`StorageError::BadIdentifier`] - Identifier unknown, expired, or exhausted
//! - [`StorageError::Io`] - Filesystem or network failure inside a backend
//! - [`StorageError::Serialization`] - Persisted state could not be encoded or decoded
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use signurl_storage::{StorageError, StorageResult};
//!
//! fn lookup(identifier: &str) -> StorageResult<()> {
//!     Err(StorageError::bad_identifier(identifier))
//! }
//!
//! let err = lookup("abc").unwrap_err();
//! assert!(err.to_string().starts_with("The identifier [abc] does not exist"));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during signed URL storage operations.
///
/// `BadIdentifier` does not distinguish between an identifier
/// that never existed, one that expired, and one whose usage budget ran out.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The identifier does not map to an existing, unexpired record with
    /// remaining usage.
    #[error("The identifier [{identifier}] does not exist or is no longer valid.")]
    BadIdentifier {
        /// The identifier exactly as presented by the caller.
        identifier: String,
    },

    /// I/O failure inside a backend.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failed operation.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Persisted state could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `BadIdentifier` error for the given identifier.
    #[must_use]
    pub fn bad_identifier(identifier: impl Into<String>) -> Self {
        Self::BadIdentifier { identifier: identifier.into() }
    }

    /// Creates a new `Io` error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), source: None }
    }

    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if this is a [`StorageError::BadIdentifier`].
    #[must_use]
    pub fn is_bad_identifier(&self) -> bool {
        matches!(self, Self::BadIdentifier { .. })
    }

    /// Returns the offending identifier for `BadIdentifier` errors.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::BadIdentifier { identifier } => Some(identifier),
            _ => None,
        }
    }
}

/// Errors produced while validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is smaller than its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest allowed value.
        min: String,
        /// Value that was supplied.
        value: String,
    },

    /// A numeric field is larger than its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the offending field.
        field: &'static str,
        /// Largest allowed value.
        max: String,
        /// Value that was supplied.
        value: String,
    },

    /// A field has a value that violates a structural constraint.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
