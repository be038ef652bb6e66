//! Validate command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use mammo_core::ServiceConfig;

/// Run the validate command.
pub fn run(config_path: &Path, format: &str) -> Result<()> {
    let config = ServiceConfig::from_yaml(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match format {
        "json" => {
            let result = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "classifier_weights": config.classifier_weights.display().to_string(),
                "segmenter_model": config.segmenter_model.display().to_string(),
                "segmenter_threads": config.segmenter_threads,
                "device": config.device.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Config is valid: {:?}", config_path);
            println!("  Classifier Weights: {:?}", config.classifier_weights);
            println!("  Segmenter Model:    {:?}", config.segmenter_model);
            println!("  Segmenter Threads:  {}", config.segmenter_threads);
            println!("  Device:             {}", config.device);
        }
    }

    Ok(())
}
