//! Classify command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use mammo_core::ClassificationResult;
use mammo_infer::InferenceService;

use super::{load_service_config, read_image, report_failure};

/// Run the classify command.
pub fn run(image_path: &Path, config_path: Option<&Path>, format: &str) -> Result<ExitCode> {
    let config = load_service_config(config_path)?;
    let bytes = read_image(image_path)?;

    let service = InferenceService::load(&config);
    let result = match service.classify_mammogram(&bytes) {
        Ok(result) => result,
        Err(e) => return report_failure(&e),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => println!("{}", render_text(image_path, &result)),
    }

    Ok(ExitCode::SUCCESS)
}

fn render_text(image_path: &Path, result: &ClassificationResult) -> String {
    format!(
        "Mammogram: {:?}\n  Prediction: {}\n  Confidence: {:.2}%\n  P(benign):    {:.4}\n  P(malignant): {:.4}",
        image_path,
        result.label,
        result.confidence * 100.0,
        result.p_benign(),
        result.p_malignant(),
    )
}
