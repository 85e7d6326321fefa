use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::time::Duration;

use helm_config::{ConfigLoader, HelmConfig};
use helm_device::ArtifactStore;

mod chat;
mod check;
mod status;

/// Helm: let a model drive your desktop and phone
#[derive(Parser)]
#[command(name = "helm", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to helm.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat in the terminal
    Chat,
    /// Check system requirements and configuration
    Check,
    /// Connect devices and show their state
    Status,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete captured screenshots past their retention age
    Cleanup {
        /// Delete every capture regardless of age
        #[arg(long)]
        all: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config; RUST_LOG beats all of them
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Chat => chat::cmd_chat(config).await,
            Commands::Check => check::cmd_check(config).await,
            Commands::Status => status::cmd_status(config).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Cleanup { all } => Self::cmd_cleanup(config, all).await,
        }
    }

    fn cmd_config(mut config: HelmConfig, json: bool) -> Result<()> {
        if config.services.anthropic_api_key.is_some() {
            config.services.anthropic_api_key = Some("********".into());
        }
        let rendered = if json {
            serde_json::to_string_pretty(&config).context("serializing config")?
        } else {
            toml::to_string_pretty(&config).context("serializing config")?
        };
        println!("{rendered}");
        Ok(())
    }

    async fn cmd_cleanup(config: HelmConfig, all: bool) -> Result<()> {
        let store = ArtifactStore::from_config(&config.storage);
        let removed = if all {
            store.purge().await?
        } else {
            let max_age = Duration::from_secs(config.storage.max_artifact_age_secs);
            store.cleanup_expired(max_age).await?
        };
        println!(
            "{} removed {removed} capture(s) from {}",
            style("🧹").dim(),
            store.dir().display()
        );
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .init(),
    }
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    }
}
