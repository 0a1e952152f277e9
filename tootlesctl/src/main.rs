//! `tootlesctl`: inspect and maintain the tootles media cache.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tootles_config::{ConfigLoad, ConfigLoader};
use tootles_model::MediaKind;
use tracing::{debug, warn};
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Parser)]
#[command(
    name = "tootlesctl",
    version,
    about = "Inspect and maintain the tootles media cache"
)]
struct Cli {
    /// Configuration file; overrides TOOTLES_MEDIA_CONFIG and the default locations
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Environment file to read instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a resource into the cache
    Fetch {
        url: String,
        /// Media kind (image, video, audio, unknown); detected from the URL when omitted
        #[arg(long)]
        kind: Option<MediaKind>,
    },
    /// Resolve a preview the way the feed would and describe the result
    Preview {
        url: String,
        /// Media kind; detected from the URL when omitted
        #[arg(long)]
        kind: Option<MediaKind>,
        /// Alt text shown in placeholders
        #[arg(long)]
        description: Option<String>,
    },
    /// Show cache usage and counters
    Stats,
    /// Drop expired entries from both tiers once
    Sweep,
    /// Remove every cached entry
    Clear,
    /// Show the effective external viewer for each media kind
    Viewers,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tootles_media=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        config,
        warnings,
        metadata,
    } = loader.load().context("failed to load configuration")?;

    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
    debug!(
        config_path = ?metadata.config_path,
        env_file_loaded = metadata.env_file_loaded,
        cache_root = %config.cache_root.display(),
        "configuration ready"
    );

    match cli.command {
        Command::Fetch { url, kind } => commands::fetch(config, &url, kind).await,
        Command::Preview {
            url,
            kind,
            description,
        } => commands::preview(config, &url, kind, description).await,
        Command::Stats => commands::stats(&config).await,
        Command::Sweep => commands::sweep(&config).await,
        Command::Clear => commands::clear(&config).await,
        Command::Viewers => {
            commands::viewers(&config);
            Ok(())
        }
        Command::Config => commands::print_config(&config),
    }
}
