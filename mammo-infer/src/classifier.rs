//! The reconstructed ViT mammogram classifier.
//!
//! Weights are persisted without a graph, so the exact topology is rebuilt
//! here and every tensor is bound by name and shape. Tensor names
//! (dense `weight` is stored `[out, in]`):
//!
//! ```text
//! patch_encoder.projection.{weight,bias}
//! patch_encoder.position_embedding.weight          [num_patches, D]
//! blocks.{i}.norm1.{weight,bias}
//! blocks.{i}.attention.{query,key,value,output}.{weight,bias}
//! blocks.{i}.norm2.{weight,bias}
//! blocks.{i}.mlp.dense_{j}.{weight,bias}
//! head.norm.{weight,bias}
//! head.mlp.dense_{j}.{weight,bias}
//! head.logits.{weight,bias}
//! ```

use std::path::Path;

use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder};
use ndarray::Array4;

use mammo_core::preprocess::check_shape;
use mammo_core::{classify_logits, ClassificationResult, ClassifierConfig, ModelKind};

use crate::encoder::{Mlp, TransformerEncoder};
use crate::patches::{PatchEmbedding, PatchEncoder};
use crate::{Error, Result};

/// Final norm, flatten, MLP and a linear layer to raw logits.
pub struct ClassificationHead {
    norm: LayerNorm,
    dropout: Dropout,
    mlp: Mlp,
    logits: Linear,
}

impl ClassificationHead {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let flat = cfg.num_patches() * cfg.projection_dim;
        let last = cfg.mlp_head_units.last().copied().unwrap_or(flat);
        Ok(Self {
            norm: layer_norm(cfg.projection_dim, cfg.layer_norm_eps, vb.pp("norm"))?,
            dropout: Dropout::new(cfg.head_dropout),
            mlp: Mlp::new(flat, &cfg.mlp_head_units, cfg.head_dropout, vb.pp("mlp"))?,
            logits: linear(last, cfg.num_classes, vb.pp("logits"))?,
        })
    }
}

impl ModuleT for ClassificationHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let representation = self.norm.forward(xs)?.flatten_from(1)?;
        let representation = self.dropout.forward_t(&representation, train)?;
        let features = self.mlp.forward_t(&representation, train)?;
        // No activation: these are logits
        self.logits.forward(&features)
    }
}

/// ViT classifier producing `[benign, malignant]` logits.
pub struct ViTClassifier {
    config: ClassifierConfig,
    patches: PatchEmbedding,
    patch_encoder: PatchEncoder,
    encoder: TransformerEncoder,
    head: ClassificationHead,
    device: Device,
}

impl ViTClassifier {
    /// Build the network, binding every parameter through `vb`.
    pub fn new(config: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        Ok(Self {
            config: config.clone(),
            patches: PatchEmbedding::new(config.patch_size),
            patch_encoder: PatchEncoder::new(config, vb.pp("patch_encoder"))?,
            encoder: TransformerEncoder::new(config, vb.pp("blocks"))?,
            head: ClassificationHead::new(config, vb.pp("head"))?,
            device,
        })
    }

    /// Load weights from a safetensors file.
    ///
    /// Fails if the file is missing, a tensor is absent, or any shape differs
    /// from what `config` implies.
    pub fn load(path: impl AsRef<Path>, config: &ClassifierConfig, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |reason: String| Error::LoadModel {
            model: ModelKind::Mammogram,
            reason: format!("{}: {reason}", path.display()),
        };

        let data = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
        let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, device)
            .map_err(|e| load_error(e.to_string()))?;
        Self::new(config, vb).map_err(|e| load_error(e.to_string()))
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Raw logits for one preprocessed `[1, H, W, C]` mammogram.
    pub fn logits(&self, input: &Array4<f32>) -> Result<[f32; 2]> {
        check_shape(input, self.config.input_shape())?;

        let data: Vec<f32> = input.iter().copied().collect();
        let images = Tensor::from_vec(data, input.shape(), &self.device)?;
        let logits = self.forward_t(&images, false)?.squeeze(0)?.to_vec1::<f32>()?;

        match logits.as_slice() {
            &[benign, malignant] => Ok([benign, malignant]),
            other => Err(mammo_core::Error::ShapeMismatch {
                expected: vec![2],
                actual: vec![other.len()],
            }
            .into()),
        }
    }

    /// Run the network and apply the softmax decision.
    pub fn classify(&self, input: &Array4<f32>) -> Result<ClassificationResult> {
        Ok(classify_logits(self.logits(input)?))
    }
}

impl ModuleT for ViTClassifier {
    /// `[B, H, W, C]` images -> `[B, num_classes]` logits.
    fn forward_t(&self, images: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let patches = self.patches.forward(images)?;
        let encoded = self.patch_encoder.forward(&patches)?;
        let encoded = self.encoder.forward_t(&encoded, train)?;
        self.head.forward_t(&encoded, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn tiny_cfg() -> ClassifierConfig {
        ClassifierConfig {
            image_size: 16,
            patch_size: 4,
            projection_dim: 8,
            num_heads: 2,
            key_dim: 4,
            depth: 2,
            transformer_units: vec![16, 8],
            mlp_head_units: vec![32, 16],
            ..ClassifierConfig::mammogram()
        }
    }

    fn random_classifier(cfg: &ClassifierConfig) -> (VarMap, ViTClassifier) {
        let varmap = VarMap::new();
        let model =
            ViTClassifier::new(cfg, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu))
                .unwrap();
        (varmap, model)
    }

    fn ramp_input(cfg: &ClassifierConfig) -> Array4<f32> {
        let s = cfg.image_size;
        Array4::from_shape_fn((1, s, s, 1), |(_, y, x, _)| ((y * s + x) % 256) as f32 - 0.5)
    }

    #[test]
    fn test_parameter_count_matches_summary() {
        let cfg = tiny_cfg();
        let (varmap, _) = random_classifier(&cfg);
        let total: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        assert_eq!(total, cfg.compute_summary().total_params);
    }

    #[test]
    fn test_tensor_names_and_shapes() {
        let cfg = tiny_cfg();
        let (varmap, _) = random_classifier(&cfg);
        let vars = varmap.data().lock().unwrap();
        let expect = |name: &str, dims: &[usize]| {
            let var = vars.get(name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(var.dims(), dims, "{name}");
        };
        expect("patch_encoder.projection.weight", &[8, 16]);
        expect("patch_encoder.position_embedding.weight", &[16, 8]);
        expect("blocks.0.norm1.weight", &[8]);
        expect("blocks.1.attention.key.weight", &[8, 8]);
        expect("blocks.1.attention.output.weight", &[8, 8]);
        expect("blocks.1.mlp.dense_0.weight", &[16, 8]);
        expect("blocks.1.mlp.dense_1.bias", &[8]);
        expect("head.norm.bias", &[8]);
        expect("head.mlp.dense_0.weight", &[32, 128]);
        expect("head.logits.weight", &[2, 16]);
        expect("head.logits.bias", &[2]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let cfg = tiny_cfg();
        let (_, model) = random_classifier(&cfg);
        let result = model.classify(&ramp_input(&cfg)).unwrap();
        assert!((result.p_benign() + result.p_malignant() - 1.0).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let cfg = tiny_cfg();
        let (_, model) = random_classifier(&cfg);
        let input = ramp_input(&cfg);
        assert_eq!(model.logits(&input).unwrap(), model.logits(&input).unwrap());
    }

    #[test]
    fn test_logits_bias_drives_decision() {
        let cfg = tiny_cfg();
        let (varmap, model) = random_classifier(&cfg);
        {
            let vars = varmap.data().lock().unwrap();
            vars["head.logits.weight"]
                .set(&Tensor::zeros((2, 16), DType::F32, &Device::Cpu).unwrap())
                .unwrap();
            vars["head.logits.bias"]
                .set(&Tensor::new(&[0.0f32, 3.0], &Device::Cpu).unwrap())
                .unwrap();
        }
        let logits = model.logits(&ramp_input(&cfg)).unwrap();
        assert_eq!(logits, [0.0, 3.0]);
        let result = model.classify(&ramp_input(&cfg)).unwrap();
        assert_eq!(result.label, mammo_core::Label::Malignant);
        assert_eq!(result.confidence, result.p_malignant());
    }

    #[test]
    fn test_wrong_input_shape() {
        let cfg = tiny_cfg();
        let (_, model) = random_classifier(&cfg);
        let err = model.logits(&Array4::zeros((1, 16, 16, 3))).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(mammo_core::Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = ClassifierConfig {
            image_size: 18,
            ..tiny_cfg()
        };
        let varmap = VarMap::new();
        assert!(
            ViTClassifier::new(&cfg, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu))
                .is_err()
        );
    }

    #[test]
    fn test_safetensors_roundtrip() {
        let cfg = tiny_cfg();
        let (varmap, model) = random_classifier(&cfg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vit.safetensors");
        varmap.save(&path).unwrap();

        let loaded = ViTClassifier::load(&path, &cfg, &Device::Cpu).unwrap();
        let input = ramp_input(&cfg);
        assert_eq!(model.logits(&input).unwrap(), loaded.logits(&input).unwrap());
    }

    #[test]
    fn test_load_rejects_shape_mismatch() {
        let cfg = tiny_cfg();
        let (varmap, _) = random_classifier(&cfg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vit.safetensors");
        varmap.save(&path).unwrap();

        let wider = ClassifierConfig {
            projection_dim: 16,
            transformer_units: vec![16, 16],
            ..cfg
        };
        let err = ViTClassifier::load(&path, &wider, &Device::Cpu).err().unwrap();
        assert!(matches!(err, Error::LoadModel { .. }));
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vit.safetensors");
        std::fs::write(&path, b"\x08\x00\x00\x00\x00\x00\x00\x00not json").unwrap();

        let err = ViTClassifier::load(&path, &tiny_cfg(), &Device::Cpu).err().unwrap();
        match err {
            Error::LoadModel { model, reason } => {
                assert_eq!(model, ModelKind::Mammogram);
                assert!(reason.contains("vit.safetensors"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = ViTClassifier::load("/nonexistent/vit.safetensors", &tiny_cfg(), &Device::Cpu)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::LoadModel {
                model: ModelKind::Mammogram,
                ..
            }
        ));
    }
}
