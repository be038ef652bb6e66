//! Inference runtime for the mammogram classifier and ultrasound segmenter.
//!
//! The classifier is a ViT rebuilt layer by layer on candle and bound to a
//! safetensors weight file; the segmenter is an opaque ONNX graph run through
//! ONNX Runtime. [`InferenceService`] owns both and exposes the two request
//! entrypoints.
//!
//! # Example
//!
//! ```ignore
//! use mammo_core::ServiceConfig;
//! use mammo_infer::InferenceService;
//!
//! let service = InferenceService::load(&ServiceConfig::default());
//! let bytes = std::fs::read("scan.png")?;
//! let result = service.classify_mammogram(&bytes)?;
//!
//! println!("{} ({:.1}%)", result.label, result.confidence * 100.0);
//! ```

pub mod classifier;
pub mod encoder;
pub mod patches;
pub mod segmenter;
pub mod service;

use mammo_core::ModelKind;

pub use classifier::{ClassificationHead, ViTClassifier};
pub use segmenter::{OnnxSegmenter, SegmentationModel};
pub use service::{candle_device, InferenceService, ServiceStatus};

/// Error types for mammo-infer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Preprocessing, configuration or post-processing failure.
    #[error(transparent)]
    Core(#[from] mammo_core::Error),

    /// Tensor runtime failure.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// ONNX Runtime failure.
    #[error("onnx runtime error: {0}")]
    Onnx(#[from] ort::Error),

    /// Model output had an unexpected rank.
    #[error("unexpected output shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Failed to load model.
    #[error("failed to load {model}: {reason}")]
    LoadModel { model: ModelKind, reason: String },

    /// The model is not loaded; other models may still serve.
    #[error("{0} is not active")]
    ModelUnavailable(ModelKind),

    /// A previous caller panicked while holding the model.
    #[error("model lock poisoned: {0}")]
    Lock(String),
}

impl Error {
    /// True for faults caused by the caller's input.
    pub fn is_user_fault(&self) -> bool {
        matches!(self, Error::Core(e) if e.is_user_fault())
    }

    /// True when the requested model is not loaded.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::ModelUnavailable(_))
    }
}

/// Result type for mammo-infer operations.
pub type Result<T> = std::result::Result<T, Error>;
