//! Error Handling Module
//!
//! Defines the error types for the defect classification library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dataset, model and training operations
#[derive(Error, Debug)]
pub enum DefectError {
    /// Error loading or decoding an image
    #[error("Cannot read image '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset operations (label lists, splits)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or loading
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for DefectError {
    fn from(err: serde_json::Error) -> Self {
        DefectError::Serialization(err.to_string())
    }
}

impl From<burn::record::RecorderError> for DefectError {
    fn from(err: burn::record::RecorderError) -> Self {
        DefectError::Serialization(format!("{err:?}"))
    }
}

/// Convenience Result type for library operations
pub type Result<T> = std::result::Result<T, DefectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DefectError::Dataset("empty label list".to_string());
        assert_eq!(format!("{}", err), "Dataset error: empty label list");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/擦花/0001.jpg");
        let err = DefectError::ImageLoad(path, "unexpected EOF".to_string());
        let msg = format!("{}", err);
        assert!(msg.starts_with("Cannot read image"));
        assert!(msg.contains("0001.jpg"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DefectError = io_err.into();
        assert!(matches!(err, DefectError::Io(_)));
    }
}
