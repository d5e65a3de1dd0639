//! Error types for the reverse-engineering engine.
//!
//! Ingestion failures are the only condition that aborts an analysis; every
//! other anomaly (a decode gap, an unresolved branch, a low-confidence
//! procedure) is recovered locally and surfaced as data on the result
//! instead of an error. See `DisassemblyResult::warnings`.

use thiserror::Error;

/// Primary error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is too small to be a recognizable artifact.
    #[error("file too small: expected at least {expected} bytes, got {actual}")]
    FileTooSmall { expected: usize, actual: usize },

    /// The program-object header claims a code region that overruns the file.
    #[error("program object header malformed: {message}")]
    MalformedProgramObject { message: String },

    /// The code region computed by the ingestor is empty or inverted.
    #[error("empty code region: start 0x{start:08X}, end 0x{end:08X}")]
    EmptyCodeRegion { start: usize, end: usize },

    /// A report format string did not match any known writer.
    #[error("unknown report format: {0}")]
    UnknownReportFormat(String),

    /// Failure while serializing a report.
    #[error("report serialization error: {0}")]
    Serialization(String),

    /// Directory walk failed during batch processing.
    #[cfg(feature = "batch")]
    #[error("batch walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Configuration error (e.g. thresholds out of range).
    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Wrap an underlying error with additional context, preserving the
    /// original message.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| EngineError::Config {
            message: format!("{}: {}", msg.into(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::FileTooSmall {
            expected: 8,
            actual: 4,
        };
        assert!(err.to_string().contains('8'));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_empty_code_region_display() {
        let err = EngineError::EmptyCodeRegion {
            start: 0x20,
            end: 0x20,
        };
        let msg = err.to_string();
        assert!(msg.contains("00000020"));
    }

    #[test]
    fn test_context() {
        let res: std::result::Result<(), &str> = Err("boom");
        let wrapped = res.context("loading module");
        assert!(wrapped.unwrap_err().to_string().contains("loading module"));
    }
}
