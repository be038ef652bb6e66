//! Turning raw model outputs into user-facing verdicts.
//!
//! Everything here is a pure function of the model output: no I/O, no model
//! state, safe to call from any thread.

use std::io::Cursor;

use base64::Engine;
use image::{GrayImage, ImageFormat};
use ndarray::{Array2, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mammogram verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Benign,
    Malignant,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Benign => write!(f, "Benign"),
            Label::Malignant => write!(f, "Malignant"),
        }
    }
}

/// Outcome of classifying one mammogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "prediction")]
    pub label: Label,
    /// Probability of the chosen label.
    pub confidence: f32,
    /// `[p_benign, p_malignant]`, summing to 1.
    #[serde(rename = "raw_output")]
    pub probabilities: [f32; 2],
}

impl ClassificationResult {
    pub fn p_benign(&self) -> f32 {
        self.probabilities[0]
    }

    pub fn p_malignant(&self) -> f32 {
        self.probabilities[1]
    }
}

/// Two-way softmax with the max subtracted for stability.
pub fn softmax(logits: [f32; 2]) -> [f32; 2] {
    let max = logits[0].max(logits[1]);
    let exp = [(logits[0] - max).exp(), (logits[1] - max).exp()];
    let sum = exp[0] + exp[1];
    [exp[0] / sum, exp[1] / sum]
}

/// Classify from the head's `[benign, malignant]` logits.
///
/// Malignant only when its probability is strictly greater; ties are Benign.
pub fn classify_logits(logits: [f32; 2]) -> ClassificationResult {
    let probabilities = softmax(logits);
    let [p_benign, p_malignant] = probabilities;

    let (label, confidence) = if p_malignant > p_benign {
        (Label::Malignant, p_malignant)
    } else {
        (Label::Benign, p_benign)
    };

    tracing::debug!(%label, confidence, "classified mammogram");
    ClassificationResult {
        label,
        confidence,
        probabilities,
    }
}

/// Binary segmentation mask with pixels in `{0, 255}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask(Array2<u8>);

impl BinaryMask {
    /// Foreground value written for pixels above threshold.
    pub const FOREGROUND: u8 = 255;

    /// `(height, width)` of the mask.
    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    pub fn as_array(&self) -> &Array2<u8> {
        &self.0
    }

    /// Number of foreground pixels.
    pub fn count_positive(&self) -> usize {
        self.0.iter().filter(|&&v| v > 0).count()
    }

    /// Encode as a single-channel 8-bit PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let (height, width) = self.dim();
        // Standard layout iterates rows first, matching image's raw buffer
        let raw: Vec<u8> = self.0.iter().copied().collect();
        let img = GrayImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
            Error::Validation(format!("mask buffer does not fit {width}x{height}"))
        })?;

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(Error::EncodeMask)?;
        Ok(buf)
    }

    /// Encode as `data:image/png;base64,<payload>` for embedding in JSON.
    pub fn to_data_uri(&self) -> Result<String> {
        let png = self.to_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

/// Outcome of segmenting one ultrasound image.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    pub mask: BinaryMask,
    /// True iff any mask pixel is foreground.
    pub tumor_detected: bool,
    /// Maximum probability anywhere in the map, not only the detected region.
    pub confidence: f32,
}

/// Binarize a `[1, H, W, 1]` probability map at `threshold` (strict `>`).
pub fn segment_probabilities(probabilities: ArrayView4<f32>, threshold: f32) -> Result<SegmentationResult> {
    let shape = probabilities.shape();
    if shape[0] != 1 || shape[3] != 1 || shape[1] == 0 || shape[2] == 0 {
        return Err(Error::ShapeMismatch {
            expected: vec![1, shape[1].max(1), shape[2].max(1), 1],
            actual: shape.to_vec(),
        });
    }

    let map = probabilities.index_axis(Axis(0), 0).index_axis_move(Axis(2), 0);
    let mask = map.mapv(|p| if p > threshold { BinaryMask::FOREGROUND } else { 0 });
    let confidence = map.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mask = BinaryMask(mask);
    let tumor_detected = mask.count_positive() > 0;

    tracing::debug!(tumor_detected, confidence, "segmented ultrasound");
    Ok(SegmentationResult {
        mask,
        tumor_detected,
        confidence,
    })
}
