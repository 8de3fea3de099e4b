//! Quill node entry point.
//!
//! Runs an issuer and a holder participant with configuration from a TOML
//! file or defaults.

// Node accessors are used by tests and embedders.
#![allow(dead_code)]

mod config;
mod node;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::QuillConfig;
use node::QuillNode;

/// Quill credential node
#[derive(Parser, Debug)]
#[command(name = "quill-node", version, about = "Quill credential issuance and holder node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "quill.toml")]
    config: PathBuf,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.init {
        QuillConfig::default()
    } else {
        QuillConfig::load(&args.config)?
    };

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    init_tracing(&config.logging.level, &config.logging.format);

    if args.init {
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    tracing::info!("Quill node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = QuillNode::new(config)?;
    node.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    } else {
        tracing::info!("received shutdown signal");
    }

    node.shutdown().await?;
    tracing::info!("Quill node stopped");
    Ok(())
}
