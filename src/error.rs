//! Error types for the reasoning core.
//!
//! Local recovery is the default: trivial derivations are dropped, subsumed
//! assertions are rejected, proof cycles are cut. These enums cover the
//! surfaces that do report failure to callers: parsing, rule validation,
//! snapshot IO, and the blocking query helper.

use thiserror::Error;

/// A KIF parse error with source location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    /// Human-readable error message
    pub message: String,
    /// 1-based source line
    pub line: u32,
    /// 1-based source column
    pub column: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Errors surfaced by the engine's fallible entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed KIF input.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A rule or potential assertion failed structural validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A KB remained full after exhausting evictable assertions.
    #[error("capacity exceeded in {kb}: {term}")]
    Capacity { kb: String, term: String },

    /// A justification id was unknown to the TMS at add time.
    #[error("unknown justification: {0}")]
    TmsInconsistency(u64),

    /// The blocking query helper timed out or its future failed.
    #[error("query failed: {0}")]
    Query(String),

    /// Snapshot could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot document was malformed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }
}
