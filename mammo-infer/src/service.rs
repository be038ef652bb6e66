//! Process-wide model ownership and the two inference entrypoints.
//!
//! Both models are loaded once at startup and never mutated afterwards. Each
//! sits behind its own mutex so concurrent requests serialize around the
//! numeric runtime, while preprocessing and decision logic run outside the
//! lock. A model that failed to load leaves its slot empty: requests for it
//! get [`Error::ModelUnavailable`] and the other model keeps serving.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use candle_core::Device;
use serde::Serialize;
use tracing::{error, info};

use mammo_core::{
    preprocess_mammogram, preprocess_ultrasound, segment_probabilities, ClassificationResult,
    ClassifierConfig, DeviceSpec, ModelKind, SegmentationResult, SegmenterConfig, ServiceConfig,
};

use crate::classifier::ViTClassifier;
use crate::segmenter::{OnnxSegmenter, SegmentationModel};
use crate::{Error, Result};

/// A loaded model, or the reason it is not loaded.
struct ModelSlot<M> {
    kind: ModelKind,
    model: Option<Mutex<M>>,
    load_error: Option<String>,
}

impl<M> ModelSlot<M> {
    fn from_load(kind: ModelKind, result: Result<M>) -> Self {
        match result {
            Ok(model) => {
                info!(model = %kind, "model loaded");
                Self {
                    kind,
                    model: Some(Mutex::new(model)),
                    load_error: None,
                }
            }
            Err(e) => {
                error!(model = %kind, error = %e, "model failed to load; marking inactive");
                Self {
                    kind,
                    model: None,
                    load_error: Some(e.to_string()),
                }
            }
        }
    }

    fn from_option(kind: ModelKind, model: Option<M>) -> Self {
        Self {
            kind,
            load_error: model.is_none().then(|| "not loaded".to_string()),
            model: model.map(Mutex::new),
        }
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn lock(&self) -> Result<MutexGuard<'_, M>> {
        let model = self.model.as_ref().ok_or(Error::ModelUnavailable(self.kind))?;
        model.lock().map_err(|e| Error::Lock(e.to_string()))
    }

    fn replace(&mut self, model: M) {
        self.model = Some(Mutex::new(model));
        self.load_error = None;
    }
}

/// Health snapshot of the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub classifier_loaded: bool,
    pub segmenter_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmenter_error: Option<String>,
}

/// Owner of the mammogram classifier and the ultrasound segmenter.
pub struct InferenceService {
    classifier_config: ClassifierConfig,
    segmenter_config: SegmenterConfig,
    classifier: ModelSlot<ViTClassifier>,
    segmenter: ModelSlot<Box<dyn SegmentationModel>>,
}

/// Map a device spec to a candle device.
pub fn candle_device(spec: DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(idx) => Ok(Device::new_cuda(idx)?),
    }
}

fn load_classifier(path: &Path, config: &ClassifierConfig, device: DeviceSpec) -> Result<ViTClassifier> {
    info!(path = %path.display(), %device, "loading mammogram classifier");
    let device = candle_device(device)?;
    ViTClassifier::load(path, config, &device)
}

fn load_segmenter(path: &Path, intra_threads: usize) -> Result<Box<dyn SegmentationModel>> {
    info!(path = %path.display(), intra_threads, "loading ultrasound segmenter");
    let segmenter = OnnxSegmenter::load(path, intra_threads)?;
    Ok(Box::new(segmenter))
}

impl InferenceService {
    /// Load both models described by `config`.
    ///
    /// Never fails: a model that cannot be loaded is logged and left
    /// inactive, see [`InferenceService::status`].
    pub fn load(config: &ServiceConfig) -> Self {
        let classifier_config = ClassifierConfig::mammogram();
        let classifier = ModelSlot::from_load(
            ModelKind::Mammogram,
            load_classifier(&config.classifier_weights, &classifier_config, config.device),
        );
        let segmenter = ModelSlot::from_load(
            ModelKind::Ultrasound,
            load_segmenter(&config.segmenter_model, config.segmenter_threads),
        );

        Self {
            classifier_config,
            segmenter_config: SegmenterConfig::ultrasound(),
            classifier,
            segmenter,
        }
    }

    /// Assemble a service from already-constructed models.
    pub fn new(
        classifier: Option<ViTClassifier>,
        segmenter: Option<Box<dyn SegmentationModel>>,
    ) -> Self {
        let classifier_config = classifier
            .as_ref()
            .map(|model| model.config().clone())
            .unwrap_or_else(ClassifierConfig::mammogram);
        Self {
            classifier_config,
            segmenter_config: SegmenterConfig::ultrasound(),
            classifier: ModelSlot::from_option(ModelKind::Mammogram, classifier),
            segmenter: ModelSlot::from_option(ModelKind::Ultrasound, segmenter),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            classifier_loaded: self.classifier.is_loaded(),
            segmenter_loaded: self.segmenter.is_loaded(),
            classifier_error: self.classifier.load_error.clone(),
            segmenter_error: self.segmenter.load_error.clone(),
        }
    }

    pub fn is_active(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Mammogram => self.classifier.is_loaded(),
            ModelKind::Ultrasound => self.segmenter.is_loaded(),
        }
    }

    /// Classify a mammogram as benign or malignant.
    pub fn classify_mammogram(&self, image_bytes: &[u8]) -> Result<ClassificationResult> {
        if !self.classifier.is_loaded() {
            return Err(Error::ModelUnavailable(ModelKind::Mammogram));
        }

        let input = preprocess_mammogram(image_bytes, &self.classifier_config)?;
        let logits = self.classifier.lock()?.logits(&input)?;
        Ok(mammo_core::classify_logits(logits))
    }

    /// Segment tumor regions in an ultrasound image.
    pub fn segment_ultrasound(&self, image_bytes: &[u8]) -> Result<SegmentationResult> {
        if !self.segmenter.is_loaded() {
            return Err(Error::ModelUnavailable(ModelKind::Ultrasound));
        }

        let input = preprocess_ultrasound(image_bytes, &self.segmenter_config)?;
        let probabilities = self.segmenter.lock()?.predict(&input)?;
        Ok(segment_probabilities(
            probabilities.view(),
            self.segmenter_config.threshold,
        )?)
    }

    /// Replace the classifier with weights from `path`.
    ///
    /// On failure the current classifier (if any) stays in place.
    pub fn reload_classifier(&mut self, path: &Path, device: DeviceSpec) -> Result<()> {
        let model = load_classifier(path, &self.classifier_config, device)?;
        self.classifier.replace(model);
        info!(model = %ModelKind::Mammogram, "model reloaded");
        Ok(())
    }

    /// Replace the segmenter with the ONNX graph at `path`.
    ///
    /// On failure the current segmenter (if any) stays in place.
    pub fn reload_segmenter(&mut self, path: &Path, intra_threads: usize) -> Result<()> {
        let model = load_segmenter(path, intra_threads)?;
        self.segmenter.replace(model);
        info!(model = %ModelKind::Ultrasound, "model reloaded");
        Ok(())
    }
}
