//! Error types for the core data model

use thiserror::Error;

/// Errors produced while constructing or validating core types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Node identifier is not an 8-digit hex string
    #[error("Invalid node ID format: {0}")]
    InvalidNodeId(String),

    /// Coordinate outside the valid geographic range
    #[error("Invalid coordinate: {field} = {value}")]
    InvalidCoordinate {
        /// Which coordinate failed validation
        field: &'static str,
        /// The rejected value
        value: f64,
    },
}

impl CoreError {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidNodeId(_) => "INVALID_NODE_ID",
            CoreError::InvalidCoordinate { .. } => "INVALID_COORDINATE",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
