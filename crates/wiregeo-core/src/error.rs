//! Error types for the wiregeo-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for wiregeo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all wiregeo operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read a source file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The source root does not exist or is not a directory
    #[error("source directory '{path}' does not exist or is not a directory")]
    NotADirectory {
        /// The offending path
        path: PathBuf,
    },

    /// The source file contained nothing but whitespace
    #[error("source file '{path}' is empty")]
    EmptySource {
        /// Path to the empty file
        path: PathBuf,
    },

    /// Structural parsing of a source file failed
    #[error("failed to parse '{path}': {details}")]
    SourceParse {
        /// Path to the file that failed to parse
        path: PathBuf,
        /// Detailed description of the issue
        details: String,
    },

    /// The entity has no deserialization routine and therefore no bundle
    #[error("entity '{entity}' has no context bundle")]
    MissingBundle {
        /// Name of the entity
        entity: String,
    },

    /// Deterministic matching could not account for every declared field
    #[error("layout of '{entity}' is unresolved for fields: {}", missing.join(", "))]
    Unresolved {
        /// Name of the entity
        entity: String,
        /// Declared fields without complete evidence
        missing: Vec<String>,
    },

    /// Transport-level failure talking to the inference oracle
    #[error("inference request failed: {0}")]
    OracleTransport(#[from] reqwest::Error),

    /// The inference oracle answered with a non-success status
    #[error("inference oracle returned HTTP {status}: {body}")]
    OracleStatus {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// The oracle response carried no usable structured output
    #[error("malformed inference response for '{entity}': {details}")]
    MalformedResponse {
        /// Name of the entity
        entity: String,
        /// Detailed description of the issue
        details: String,
    },

    /// A layout record violated a structural invariant
    #[error("invalid layout for '{entity}': {details}")]
    InvalidLayout {
        /// Name of the entity
        entity: String,
        /// Detailed description of the violation
        details: String,
    },

    /// An inference call exceeded its deadline
    #[error("inference for '{entity}' timed out after {after:?}")]
    Timeout {
        /// Name of the entity
        entity: String,
        /// Configured deadline
        after: Duration,
    },

    /// An inference call was cancelled before it completed
    #[error("inference for '{entity}' was cancelled")]
    Cancelled {
        /// Name of the entity
        entity: String,
    },

    /// No credential was supplied for the inference oracle
    #[error("no inference credential configured (pass one explicitly or set {env})")]
    MissingCredential {
        /// Environment variable consulted
        env: &'static str,
    },

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new not-a-directory error
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates a new empty source error
    pub fn empty_source(path: impl Into<PathBuf>) -> Self {
        Self::EmptySource { path: path.into() }
    }

    /// Creates a new source parse error
    pub fn source_parse(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::SourceParse {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Creates a new malformed response error
    pub fn malformed(entity: impl Into<String>, details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            entity: entity.into(),
            details: details.into(),
        }
    }

    /// Creates a new invalid layout error
    pub fn invalid_layout(entity: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidLayout {
            entity: entity.into(),
            details: details.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a per-file input error that should be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::EmptySource { .. } | Self::SourceParse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Unresolved {
            entity: "Connect".into(),
            missing: vec!["uuid".into(), "name".into()],
        };
        assert_eq!(
            err.to_string(),
            "layout of 'Connect' is unresolved for fields: uuid, name"
        );

        let err = Error::not_a_directory("/no/such/dir");
        assert!(err.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::empty_source("A.java").is_recoverable());
        assert!(Error::source_parse("A.java", "unbalanced braces").is_recoverable());
        assert!(!Error::not_a_directory("/test").is_recoverable());
        assert!(!Error::malformed("A", "no tool output").is_recoverable());
    }
}
