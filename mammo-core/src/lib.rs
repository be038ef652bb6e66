//! Core types for mammogram classification and ultrasound segmentation.
//!
//! This crate holds everything that does not need a numeric runtime:
//! configuration, the two training-matched preprocessors, and the decision
//! logic that turns model outputs into verdicts and transport-ready masks.

pub mod config;
pub mod decision;
mod error;
pub mod preprocess;
pub mod resample;

pub use config::{
    ClassifierConfig, DeviceSpec, ModelKind, ModelSummary, SegmenterConfig, ServiceConfig,
};
pub use decision::{
    classify_logits, segment_probabilities, softmax, BinaryMask, ClassificationResult, Label,
    SegmentationResult,
};
pub use error::{Error, Result};
pub use preprocess::{preprocess_mammogram, preprocess_ultrasound};
