//! Error types for mammo-core.

use std::path::PathBuf;

/// Result type alias using mammo-core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by configuration, preprocessing and post-processing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid device specification.
    #[error("invalid device: {0}")]
    InvalidDevice(String),

    /// No image payload was supplied.
    #[error("no image payload supplied")]
    EmptyInput,

    /// The payload is not a decodable image.
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// A tensor does not have the shape the model expects.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The binary mask could not be encoded as PNG.
    #[error("failed to encode mask: {0}")]
    EncodeMask(#[source] image::ImageError),
}

impl Error {
    /// True for faults caused by the caller's input rather than the service.
    pub fn is_user_fault(&self) -> bool {
        matches!(self, Error::EmptyInput | Error::Decode(_))
    }
}
