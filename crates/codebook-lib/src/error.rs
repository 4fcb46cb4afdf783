//! Error types shared across the crate
//!
//! Configuration problems fail fast before any data is touched, and
//! data-integrity problems abort the whole operation. Degenerate inputs
//! (empty clusters, over-threshold self-distances) are not errors.

use crate::alphabet::EncodingError;
use thiserror::Error;

/// Main error type for codebook operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure while reading or writing a stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sequence or k-mer contains a character outside the alphabet
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Invalid parameters, rejected before any work is done
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// A malformed record in a codebook or matrix file
    #[error("Parse error at line {line}: {message} (line: {content:?})")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Offending line content
        content: String,
        /// What was wrong
        message: String,
    },

    /// A member record references a sequence that is not in the sequence index
    #[error("Unknown sequence '{id}' at line {line}")]
    UnknownSequence {
        /// Sequence identifier
        id: String,
        /// 1-based line number
        line: usize,
    },

    /// A cluster record references a prototype that is not in the prototype index
    #[error("Unknown prototype '{id}' at line {line}")]
    UnknownPrototype {
        /// Prototype sequence identifier
        id: String,
        /// 1-based line number
        line: usize,
    },
}

/// Result alias for codebook operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a parse error carrying the offending line
    pub fn parse(line: usize, content: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            content: content.into(),
            message: message.into(),
        }
    }
}
