//! Model and service configuration types.
//!
//! The classifier architecture is fixed at training time, so
//! [`ClassifierConfig`] is a typed constructor parameter rather than something
//! read from disk. Only deployment concerns (file locations, device, thread
//! counts) live in the YAML-backed [`ServiceConfig`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The two models served by this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// ViT benign/malignant mammogram classifier.
    Mammogram,
    /// Ultrasound tumor segmenter.
    Ultrasound,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Mammogram => write!(f, "mammogram classifier"),
            ModelKind::Ultrasound => write!(f, "ultrasound segmenter"),
        }
    }
}

/// Architecture of the ViT mammogram classifier.
///
/// These values must match the network the weights were trained with. Use
/// [`ClassifierConfig::mammogram`]; other values only make sense for tests
/// that build small random networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    // Inputs
    pub image_size: usize,
    pub in_channels: usize,
    pub patch_size: usize,

    // Transformer architecture
    pub projection_dim: usize,
    pub num_heads: usize,
    pub key_dim: usize,
    pub depth: usize,
    pub transformer_units: Vec<usize>,

    // Head
    pub mlp_head_units: Vec<usize>,
    pub num_classes: usize,

    // Regularization (inactive at inference)
    pub attention_dropout: f32,
    pub hidden_dropout: f32,
    pub head_dropout: f32,

    pub layer_norm_eps: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::mammogram()
    }
}

impl ClassifierConfig {
    /// The configuration the mammogram weights were trained with.
    pub fn mammogram() -> Self {
        Self {
            image_size: 224,
            in_channels: 1,
            patch_size: 16,
            projection_dim: 64,
            num_heads: 4,
            key_dim: 64,
            depth: 8,
            transformer_units: vec![128, 64],
            mlp_head_units: vec![2048, 1024],
            num_classes: 2,
            attention_dropout: 0.1,
            hidden_dropout: 0.1,
            head_dropout: 0.5,
            layer_norm_eps: 1e-6,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(Error::Validation(format!(
                "image_size {} must be divisible by patch_size {}",
                self.image_size, self.patch_size
            )));
        }

        if self.depth == 0 {
            return Err(Error::Validation("depth must be > 0".to_string()));
        }

        if self.num_heads == 0 || self.key_dim == 0 {
            return Err(Error::Validation(
                "num_heads and key_dim must be > 0".to_string(),
            ));
        }

        // The block MLP output is added back onto the residual stream
        match self.transformer_units.last() {
            Some(&last) if last == self.projection_dim => {}
            other => {
                return Err(Error::Validation(format!(
                    "last transformer unit ({:?}) must equal projection_dim ({})",
                    other, self.projection_dim
                )));
            }
        }

        if self.num_classes != 2 {
            return Err(Error::Validation(format!(
                "num_classes must be 2 (benign/malignant), got {}",
                self.num_classes
            )));
        }

        Ok(())
    }

    /// Number of patches along one side of the image.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Number of patches after patch embedding.
    pub fn num_patches(&self) -> usize {
        self.grid_size() * self.grid_size()
    }

    /// Length of one flattened patch vector.
    pub fn patch_dim(&self) -> usize {
        self.patch_size * self.patch_size * self.in_channels
    }

    /// Total projected width of the attention heads.
    pub fn attention_width(&self) -> usize {
        self.num_heads * self.key_dim
    }

    /// Expected preprocessed input shape `[batch, height, width, channels]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.image_size, self.image_size, self.in_channels]
    }

    /// Compute a summary of the model's architecture and parameters.
    pub fn compute_summary(&self) -> ModelSummary {
        let d = self.projection_dim;
        let width = self.attention_width();
        let num_patches = self.num_patches();

        let dense = |inputs: usize, units: usize| inputs * units + units;
        let norm = 2 * d;

        let patch_projection_params = dense(self.patch_dim(), d);
        let pos_embedding_params = num_patches * d;

        let attention_params = 3 * dense(d, width) + dense(width, d);
        let (block_mlp_params, _) = self
            .transformer_units
            .iter()
            .fold((0, d), |(acc, prev), &units| (acc + dense(prev, units), units));
        let params_per_block = 2 * norm + attention_params + block_mlp_params;
        let transformer_params = params_per_block * self.depth;

        let (head_mlp_params, head_out) = self
            .mlp_head_units
            .iter()
            .fold((0, num_patches * d), |(acc, prev), &units| {
                (acc + dense(prev, units), units)
            });
        let head_params = norm + head_mlp_params + dense(head_out, self.num_classes);

        let total_params = patch_projection_params
            + pos_embedding_params
            + transformer_params
            + head_params;

        ModelSummary {
            total_params,
            patch_projection_params,
            pos_embedding_params,
            params_per_block,
            transformer_params,
            head_params,
            depth: self.depth,
            projection_dim: d,
            num_heads: self.num_heads,
            key_dim: self.key_dim,
            patch_size: self.patch_size,
            num_patches,
            patch_dim: self.patch_dim(),
        }
    }
}

/// Summary of model architecture and parameter counts.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub total_params: usize,
    pub patch_projection_params: usize,
    pub pos_embedding_params: usize,
    pub params_per_block: usize,
    pub transformer_params: usize,
    pub head_params: usize,
    pub depth: usize,
    pub projection_dim: usize,
    pub num_heads: usize,
    pub key_dim: usize,
    pub patch_size: usize,
    pub num_patches: usize,
    pub patch_dim: usize,
}

impl ModelSummary {
    /// Estimated memory for f32 model parameters in bytes.
    pub fn param_memory_bytes(&self) -> usize {
        self.total_params * std::mem::size_of::<f32>()
    }

    /// Format the summary as a human-readable string.
    pub fn display(&self) -> String {
        let param_mb = self.param_memory_bytes() as f64 / 1_000_000.0;
        let total_m = self.total_params as f64 / 1_000_000.0;

        format!(
            r#"Model Summary
=============
Architecture:
  Depth:              {}
  Projection Dim:     {}
  Attention Heads:    {}
  Key Dimension:      {}

Patches:
  Patch Size:         {}
  Num Patches:        {}
  Patch Vector:       {}

Parameters:
  Total:              {:.2}M
  Patch Projection:   {}
  Position Table:     {}
  Transformer:        {}
  Per Block:          {}
  Head:               {}

Memory:
  Parameters:         {:.2} MB (float32)"#,
            self.depth,
            self.projection_dim,
            self.num_heads,
            self.key_dim,
            self.patch_size,
            self.num_patches,
            self.patch_dim,
            total_m,
            self.patch_projection_params,
            self.pos_embedding_params,
            self.transformer_params,
            self.params_per_block,
            self.head_params,
            param_mb,
        )
    }
}

/// Input geometry and decision threshold of the ultrasound segmenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub image_size: usize,
    pub in_channels: usize,
    /// Pixels with probability strictly above this are tumor.
    pub threshold: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::ultrasound()
    }
}

impl SegmenterConfig {
    /// The configuration the ultrasound segmenter was trained with.
    pub fn ultrasound() -> Self {
        Self {
            image_size: 128,
            in_channels: 3,
            threshold: 0.5,
        }
    }

    /// Expected preprocessed input shape `[batch, height, width, channels]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.image_size, self.image_size, self.in_channels]
    }
}

/// Device specification for the classifier runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    /// CPU device.
    #[default]
    Cpu,
    /// CUDA device with index.
    Cuda(usize),
}

impl DeviceSpec {
    /// Parse a device string like "cpu" or "cuda:0".
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            Ok(DeviceSpec::Cpu)
        } else if s.starts_with("cuda") {
            let idx = if s == "cuda" {
                0
            } else if let Some(rest) = s.strip_prefix("cuda:") {
                rest.parse::<usize>()
                    .map_err(|_| Error::InvalidDevice(s.clone()))?
            } else {
                return Err(Error::InvalidDevice(s));
            };
            Ok(DeviceSpec::Cuda(idx))
        } else {
            Err(Error::InvalidDevice(s))
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

impl Serialize for DeviceSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DeviceSpec::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Environment variable overriding [`ServiceConfig::classifier_weights`].
pub const ENV_CLASSIFIER_WEIGHTS: &str = "MAMMO_CLASSIFIER_WEIGHTS";
/// Environment variable overriding [`ServiceConfig::segmenter_model`].
pub const ENV_SEGMENTER_MODEL: &str = "MAMMO_SEGMENTER_MODEL";
/// Environment variable overriding [`ServiceConfig::device`].
pub const ENV_DEVICE: &str = "MAMMO_DEVICE";

/// Deployment configuration: where the weights live and how to run them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_classifier_weights")]
    pub classifier_weights: PathBuf,
    #[serde(default = "default_segmenter_model")]
    pub segmenter_model: PathBuf,
    #[serde(default = "default_segmenter_threads")]
    pub segmenter_threads: usize,
    #[serde(default)]
    pub device: DeviceSpec,
}

fn default_classifier_weights() -> PathBuf {
    PathBuf::from("models/vit_mammogram_model.safetensors")
}
fn default_segmenter_model() -> PathBuf {
    PathBuf::from("models/ultrasound_segmenter.onnx")
}
fn default_segmenter_threads() -> usize {
    1
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            classifier_weights: default_classifier_weights(),
            segmenter_model: default_segmenter_model(),
            segmenter_threads: default_segmenter_threads(),
            device: DeviceSpec::default(),
        }
    }
}

impl ServiceConfig {
    /// Load a ServiceConfig from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse a ServiceConfig from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ServiceConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup such as `std::env::var`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_CLASSIFIER_WEIGHTS) {
            self.classifier_weights = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_SEGMENTER_MODEL) {
            self.segmenter_model = PathBuf::from(path);
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            self.device = DeviceSpec::parse(&device)?;
        }
        Ok(self)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.segmenter_threads == 0 {
            return Err(Error::Validation(
                "segmenter_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
