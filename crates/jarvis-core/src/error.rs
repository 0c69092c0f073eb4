//! Error taxonomy for the Jarvis memory core
//!
//! Every fallible operation returns [`JarvisResult`]. Variants map onto the
//! way callers are expected to react:
//!
//! - [`JarvisError::NotFound`]: no history yet, not fatal
//! - [`JarvisError::Upstream`] / [`JarvisError::Timeout`]: summarizer or
//!   generation engine trouble, retryable
//! - [`JarvisError::OutOfRange`]: a compaction batch larger than the log
//! - [`JarvisError::Storage`]: the document store refused an operation

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type JarvisResult<T> = Result<T, JarvisError>;

/// Errors produced by the memory core
#[derive(Debug, Error)]
pub enum JarvisError {
    /// A keyed record does not exist
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Kind of record ("participant", "entity log", ...)
        kind: &'static str,
        /// Key that was looked up
        key: String,
    },

    /// An external engine (summarizer, generator) failed
    #[error("upstream failure during {operation}: {message}")]
    Upstream {
        /// Operation that was running
        operation: String,
        /// Upstream error description
        message: String,
    },

    /// An external engine did not answer in time
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation that was running
        operation: String,
        /// Configured deadline
        elapsed: Duration,
    },

    /// A prefix removal asked for more turns than the log holds
    #[error("cannot remove {requested} items, only {available} available")]
    OutOfRange {
        /// Requested prefix length
        requested: usize,
        /// Current length
        available: usize,
    },

    /// The underlying document store failed
    #[error("storage operation '{operation}' failed: {source}")]
    Storage {
        /// Store operation name
        operation: String,
        /// Underlying cause
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Caller input did not satisfy a constraint
    #[error("invalid {field}: {constraint} (got {value})")]
    Validation {
        /// Offending field
        field: String,
        /// Constraint that was violated
        constraint: String,
        /// Value that was supplied
        value: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A document could not be converted to or from JSON
    #[error("serialization failed during {operation}: {source}")]
    Serialization {
        /// Conversion that was running
        operation: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl JarvisError {
    /// Build a [`JarvisError::NotFound`]
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Build a [`JarvisError::Upstream`]
    pub fn upstream(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Build a [`JarvisError::Timeout`]
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Build a [`JarvisError::OutOfRange`]
    pub fn out_of_range(requested: usize, available: usize) -> Self {
        Self::OutOfRange {
            requested,
            available,
        }
    }

    /// Build a [`JarvisError::Storage`] from any error type
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Build a [`JarvisError::Validation`]
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    /// Build a [`JarvisError::Config`]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Build a [`JarvisError::Serialization`]
    pub fn serialization(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            operation: operation.into(),
            source,
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::Timeout { .. } | Self::Storage { .. }
        )
    }

    /// Whether the error only means "nothing recorded yet"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short category label for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Storage { .. } => "storage",
            Self::Validation { .. } => "validation",
            Self::Config(_) => "config",
            Self::Serialization { .. } => "serialization",
        }
    }
}
