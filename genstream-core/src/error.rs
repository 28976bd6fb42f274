//! Error types for genstream-core

use thiserror::Error;

/// Main error type for the genstream-core library
///
/// Intermediate parser failures never surface here; they are absorbed by the
/// next fallback and reported as [`PipelineWarning`](crate::types::PipelineWarning)s.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Model transport failed to open or deliver a stream
    #[error("transport error: {0}")]
    Transport(String),

    /// Generation was cancelled between chunks
    #[error("generation cancelled")]
    Cancelled,

    /// Neither structured recovery nor emergency extraction produced a file
    #[error("could not parse response ({} chars received)", raw_text.chars().count())]
    Unrecoverable {
        /// Last raw response text, kept for diagnostics
        raw_text: String,
    },

    /// Continuation loop hit its batch limit with files still missing
    #[error("continuation stopped after {batches} batches with {} file(s) missing", remaining.len())]
    ContinuationExhausted {
        batches: usize,
        remaining: Vec<String>,
    },
}

/// Result type alias for genstream-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_message_counts_chars() {
        let err = Error::Unrecoverable {
            raw_text: "héllo".to_string(),
        };
        assert_eq!(err.to_string(), "could not parse response (5 chars received)");
    }

    #[test]
    fn test_exhausted_message() {
        let err = Error::ContinuationExhausted {
            batches: 5,
            remaining: vec!["a.tsx".to_string(), "b.tsx".to_string()],
        };
        assert!(err.to_string().contains("5 batches"));
        assert!(err.to_string().contains("2 file(s)"));
    }
}
