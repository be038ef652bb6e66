//! Health command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use mammo_infer::{InferenceService, ServiceStatus};

use super::load_service_config;

/// Run the health command.
///
/// Always reports `healthy`: an unloaded model degrades the service rather
/// than taking it down.
pub fn run(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_service_config(config_path)?;
    let service = InferenceService::load(&config);

    let value = to_json(&service.status());
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(ExitCode::SUCCESS)
}

fn to_json(status: &ServiceStatus) -> serde_json::Value {
    let mut value = serde_json::json!({
        "status": "healthy",
        "model_loaded": status.classifier_loaded,
        "segmenter_loaded": status.segmenter_loaded,
    });
    if let Some(e) = &status.classifier_error {
        value["classifier_error"] = e.clone().into();
    }
    if let Some(e) = &status.segmenter_error {
        value["segmenter_error"] = e.clone().into();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_json() {
        let status = ServiceStatus {
            classifier_loaded: true,
            segmenter_loaded: false,
            classifier_error: None,
            segmenter_error: Some("file not found".to_string()),
        };
        let value = to_json(&status);
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["model_loaded"], true);
        assert_eq!(value["segmenter_loaded"], false);
        assert_eq!(value["segmenter_error"], "file not found");
        assert!(value.get("classifier_error").is_none());
    }
}
