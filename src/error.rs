use thiserror::Error;

/// Error types for the specfit-rs library.
#[derive(Error, Debug)]
pub enum SpecFitError {
    /// Unknown optimizer name, unknown parameter/component/group reference,
    /// or a keyword the chosen backend does not accept.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A scalar value lies outside its declared bounds.
    #[error("Bounds violation: {0}")]
    BoundsViolation(String),

    /// Operation requested in a state that does not support it.
    #[error("Invalid state: {0}")]
    State(String),

    /// Lengths or shapes of data do not agree.
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    /// A referenced parameter, group, spectrum or region does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed text input (spectrum files).
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<crate::parameters::bounds::BoundsError> for SpecFitError {
    fn from(err: crate::parameters::bounds::BoundsError) -> Self {
        use crate::parameters::bounds::BoundsError;
        match err {
            BoundsError::InvalidBounds { .. } => SpecFitError::Configuration(err.to_string()),
            _ => SpecFitError::BoundsViolation(err.to_string()),
        }
    }
}

/// Result type alias for specfit-rs operations.
pub type Result<T> = std::result::Result<T, SpecFitError>;
