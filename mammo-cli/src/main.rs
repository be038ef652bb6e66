//! CLI for mammogram classification and ultrasound tumor segmentation.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mammo")]
#[command(author, version, about = "Breast imaging inference: mammogram classification and ultrasound segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a mammogram as benign or malignant
    Classify {
        /// Path to the mammogram image
        image: PathBuf,

        /// Path to the YAML service configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format (text or json)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Segment tumor regions in an ultrasound image
    Segment {
        /// Path to the ultrasound image
        image: PathBuf,

        /// Path to the YAML service configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format (text or json)
        #[arg(long, default_value = "json")]
        format: String,

        /// Also write the binary mask as a PNG file
        #[arg(long)]
        mask_out: Option<PathBuf>,
    },

    /// Report which models load with the given configuration
    Health {
        /// Path to the YAML service configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Summarize the mammogram classifier architecture
    Summarize {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate a service configuration file
    Validate {
        /// Path to the YAML service configuration
        config: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries the results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mammo=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            image,
            config,
            format,
        } => commands::classify::run(&image, config.as_deref(), &format),
        Commands::Segment {
            image,
            config,
            format,
            mask_out,
        } => commands::segment::run(&image, config.as_deref(), &format, mask_out.as_deref()),
        Commands::Health { config } => commands::health::run(config.as_deref()),
        Commands::Summarize { format } => {
            commands::summarize::run(&format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { config, format } => {
            commands::validate::run(&config, &format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
