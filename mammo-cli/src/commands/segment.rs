//! Segment command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use mammo_core::SegmentationResult;
use mammo_infer::InferenceService;
use tracing::info;

use super::{load_service_config, read_image, report_failure};

/// Run the segment command.
pub fn run(
    image_path: &Path,
    config_path: Option<&Path>,
    format: &str,
    mask_out: Option<&Path>,
) -> Result<ExitCode> {
    let config = load_service_config(config_path)?;
    let bytes = read_image(image_path)?;

    let service = InferenceService::load(&config);
    let result = match service.segment_ultrasound(&bytes) {
        Ok(result) => result,
        Err(e) => return report_failure(&e),
    };

    if let Some(path) = mask_out {
        let png = result.mask.to_png()?;
        std::fs::write(path, png).with_context(|| format!("Failed to write mask to {:?}", path))?;
        info!(path = %path.display(), "wrote mask");
    }

    match format {
        "json" => {
            let value = to_json(&result)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            let (height, width) = result.mask.dim();
            println!("Ultrasound: {:?}", image_path);
            println!("  Tumor Detected: {}", result.tumor_detected);
            println!("  Confidence:     {:.4}", result.confidence);
            println!("  Mask:           {}x{} ({} foreground pixels)", width, height, result.mask.count_positive());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Response body with the mask inlined as a PNG data URI.
fn to_json(result: &SegmentationResult) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "mask": result.mask.to_data_uri()?,
        "tumor_detected": result.tumor_detected,
        "confidence": result.confidence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_json_response_shape() {
        let mut probs = Array4::<f32>::zeros((1, 4, 4, 1));
        probs[[0, 1, 2, 0]] = 0.9;
        let result = mammo_core::segment_probabilities(probs.view(), 0.5).unwrap();

        let value = to_json(&result).unwrap();
        assert_eq!(value["tumor_detected"], true);
        assert!(value["mask"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!((value["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }
}
