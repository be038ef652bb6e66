//! Summarize command implementation.

use anyhow::{Context, Result};
use mammo_core::ClassifierConfig;

/// Run the summarize command.
pub fn run(format: &str) -> Result<()> {
    let config = ClassifierConfig::mammogram();
    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    let summary = config.compute_summary();

    match format {
        "json" => {
            let result = serde_json::json!({
                "architecture": {
                    "depth": summary.depth,
                    "projection_dim": summary.projection_dim,
                    "num_heads": summary.num_heads,
                    "key_dim": summary.key_dim,
                    "transformer_units": config.transformer_units,
                    "mlp_head_units": config.mlp_head_units,
                },
                "input": {
                    "shape": config.input_shape(),
                    "patch_size": summary.patch_size,
                    "num_patches": summary.num_patches,
                    "patch_dim": summary.patch_dim,
                },
                "parameters": {
                    "total": summary.total_params,
                    "total_millions": summary.total_params as f64 / 1_000_000.0,
                    "patch_projection": summary.patch_projection_params,
                    "position_embedding": summary.pos_embedding_params,
                    "transformer": summary.transformer_params,
                    "per_block": summary.params_per_block,
                    "head": summary.head_params,
                },
                "memory": {
                    "params_bytes": summary.param_memory_bytes(),
                    "params_mb": summary.param_memory_bytes() as f64 / 1_000_000.0,
                },
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("{}", summary.display());
        }
    }

    Ok(())
}
