//! Subcommand implementations and the helpers they share.

pub mod classify;
pub mod health;
pub mod segment;
pub mod summarize;
pub mod validate;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use mammo_core::ServiceConfig;
use tracing::warn;

/// Load the service configuration.
///
/// A missing file falls back to defaults; environment overrides apply on top.
pub fn load_service_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) if path.exists() => ServiceConfig::from_yaml(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        Some(path) => {
            warn!(path = %path.display(), "config file not found; using defaults");
            ServiceConfig::default()
        }
        None => ServiceConfig::default(),
    };

    let config = config
        .with_env_overrides()
        .with_context(|| "Invalid environment override")?;
    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Read an image payload from disk.
pub fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read image {:?}", path))
}

/// Short classification of an inference error for machine consumers.
pub fn failure_kind(err: &mammo_infer::Error) -> &'static str {
    if err.is_user_fault() {
        "decode"
    } else if err.is_unavailable() {
        "unavailable"
    } else {
        "internal"
    }
}

/// Body printed on stdout when an inference request fails.
pub fn failure_json(err: &mammo_infer::Error) -> serde_json::Value {
    serde_json::json!({
        "error": err.to_string(),
        "kind": failure_kind(err),
    })
}

/// Print the failure object and pick the exit code.
pub fn report_failure(err: &mammo_infer::Error) -> Result<ExitCode> {
    tracing::error!(error = %err, "inference failed");
    println!("{}", serde_json::to_string_pretty(&failure_json(err))?);
    Ok(ExitCode::FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mammo_core::ModelKind;
    use std::io::Write;

    #[test]
    fn test_failure_kinds() {
        let decode: mammo_infer::Error = mammo_core::Error::EmptyInput.into();
        assert_eq!(failure_kind(&decode), "decode");

        let unavailable = mammo_infer::Error::ModelUnavailable(ModelKind::Ultrasound);
        assert_eq!(failure_kind(&unavailable), "unavailable");

        let internal = mammo_infer::Error::Lock("poisoned".to_string());
        assert_eq!(failure_kind(&internal), "internal");
    }

    #[test]
    fn test_failure_json_shape() {
        let err = mammo_infer::Error::ModelUnavailable(ModelKind::Mammogram);
        let value = failure_json(&err);
        assert_eq!(value["kind"], "unavailable");
        assert_eq!(value["error"], "mammogram classifier is not active");
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_service_config(Some(Path::new("/nonexistent/mammo.yaml"))).unwrap();
        assert_eq!(config.segmenter_threads, 1);
    }

    #[test]
    fn test_config_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "segmenter_threads: 3").unwrap();
        let config = load_service_config(Some(file.path())).unwrap();
        assert_eq!(config.segmenter_threads, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "segmenter_threads: 0").unwrap();
        assert!(load_service_config(Some(file.path())).is_err());
    }
}
