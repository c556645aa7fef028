//! Error types for rust_atacseq

use thiserror::Error;

/// Main error type for peak analysis operations
#[derive(Error, Debug)]
pub enum AtacError {
    /// Malformed or misaligned input tables
    #[error("Format error: {reason}")]
    Format { reason: String },

    /// Too few samples or peaks to normalize or test
    #[error("Insufficient data: {reason}")]
    InsufficientData { reason: String },

    /// Invalid or empty comparison group
    #[error("Invalid contrast: {reason}")]
    Contrast { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AtacError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        AtacError::Format { reason: reason.into() }
    }

    pub(crate) fn insufficient(reason: impl Into<String>) -> Self {
        AtacError::InsufficientData { reason: reason.into() }
    }

    pub(crate) fn contrast(reason: impl Into<String>) -> Self {
        AtacError::Contrast { reason: reason.into() }
    }
}

/// Result type alias for peak analysis operations
pub type Result<T> = std::result::Result<T, AtacError>;
