//! Error taxonomy for the enhancement pipeline.
//!
//! Errors fall into two classes: fatal-to-document (ingest failures,
//! irrecoverable I/O) and recorded-but-recoverable (a single OCR attempt
//! timing out, one variant failing to generate). Stage code decides which
//! class applies; this module only provides the vocabulary.

use thiserror::Error;

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required external engine or resource is missing.
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// Stage-specific processing failure.
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Caller supplied invalid input. Rejected up front, no partial work.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is malformed or inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A bounded operation exceeded its budget.
    #[error("Timed out after {elapsed_ms}ms: {context}")]
    Timeout { context: String, elapsed_ms: u64 },

    /// Artifact or case lookup miss.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error should abort the whole document run.
    ///
    /// Timeouts and per-combination processing failures are recorded and
    /// skipped; everything else propagates.
    pub fn is_fatal_to_document(&self) -> bool {
        !matches!(
            self,
            PipelineError::Timeout { .. } | PipelineError::ProcessingFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal() {
        let err = PipelineError::Timeout {
            context: "ocr attempt".to_string(),
            elapsed_ms: 5000,
        };
        assert!(!err.is_fatal_to_document());
    }

    #[test]
    fn test_invalid_input_is_fatal() {
        let err = PipelineError::InvalidInput("empty file".to_string());
        assert!(err.is_fatal_to_document());
    }
}
