//! Ultrasound segmentation backends.
//!
//! The segmenter architecture is not reconstructed here; it is loaded as an
//! opaque ONNX graph and only its `[1, H, W, 1]` probability map is consumed.

use std::path::Path;

use ndarray::{Array4, Ix4};
use ort::session::Session;
use ort::value::TensorRef;

use mammo_core::ModelKind;

use crate::{Error, Result};

/// A model mapping `[1, H, W, 3]` images in `[0, 1]` to `[1, H, W, 1]`
/// per-pixel tumor probabilities.
///
/// `predict` takes `&mut self`; callers sharing one instance must serialize
/// access.
pub trait SegmentationModel: Send {
    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Segmenter backed by an ONNX Runtime session.
pub struct OnnxSegmenter {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSegmenter {
    /// Load an ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>, intra_threads: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let load_error = |reason: String| Error::LoadModel {
            model: ModelKind::Ultrasound,
            reason: format!("{}: {reason}", model_path.display()),
        };

        if !model_path.exists() {
            return Err(load_error("file not found".to_string()));
        }

        let session = Session::builder()
            .map_err(|e| load_error(e.to_string()))?
            .with_intra_threads(intra_threads)
            .map_err(|e| load_error(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| load_error(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| load_error("model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| load_error("model has no outputs".to_string()))?;

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl SegmentationModel for OnnxSegmenter {
    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let input_tensor = TensorRef::from_array_view(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let output = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        Ok(output.to_owned().into_dimensionality::<Ix4>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model() {
        let err = OnnxSegmenter::load("/nonexistent/segmenter.onnx", 1).err().unwrap();
        match err {
            Error::LoadModel { model, reason } => {
                assert_eq!(model, ModelKind::Ultrasound);
                assert!(reason.contains("file not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();
        let err = OnnxSegmenter::load(&path, 1).err().unwrap();
        assert!(matches!(err, Error::LoadModel { .. }));
    }
}
