//! mcat-ingest - Main entry point
//!
//! One-shot library runs, the long-running daemon (scheduler, watcher and
//! status endpoint) and cache maintenance.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcat_common::config::{self, LoggingConfig, TomlConfig};
use mcat_common::events::{EventBus, RunTrigger};
use mcat_ingest::cache::{Cache, SqliteCache};
use mcat_ingest::config::Overrides;
use mcat_ingest::IngestService;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for mcat-ingest
#[derive(Parser, Debug)]
#[command(name = "mcat-ingest")]
#[command(about = "Concurrent media library ingestion")]
#[command(version)]
struct Cli {
    /// Config file (default: MCAT_CONFIG, then the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of concurrent item workers
    #[arg(short, long, env = "MCAT_WORKERS", global = true)]
    workers: Option<usize>,

    /// Directory receiving rendered artifacts
    #[arg(long, env = "MCAT_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Metadata provider API key
    #[arg(long, env = "MCAT_PROVIDER_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MCAT_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan library roots once and ingest every media file
    Run {
        /// Library roots (default: [library] roots from the config file)
        roots: Vec<PathBuf>,
    },
    /// Run the scheduler and/or watcher until interrupted
    Daemon,
    /// Inspect or maintain the metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print entry and counter statistics
    Stats,
    /// Remove every entry
    Clear,
    /// Remove expired entries
    Purge,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let mut toml_config = config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let roots = match &cli.command {
        Command::Run { roots } => roots.clone(),
        _ => Vec::new(),
    };
    Overrides {
        workers: cli.workers,
        roots,
        output_dir: cli.output_dir.clone(),
        api_key: cli.api_key.clone(),
        log_level: cli.log_level.clone(),
    }
    .apply(&mut toml_config);

    toml_config.validate().context("Invalid configuration")?;

    init_tracing(&toml_config.logging)?;
    info!(
        config = %config_path.display(),
        found = config_path.exists(),
        "Configuration resolved"
    );

    match cli.command {
        Command::Run { .. } => run_once(toml_config).await,
        Command::Daemon => run_daemon(toml_config).await,
        Command::Cache { action } => cache_command(&toml_config, action).await,
        Command::Config { action } => config_command(&toml_config, &config_path, action),
    }
}

/// Registry with an env filter and one fmt layer to stderr or the log file
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn", logging.level.to_ascii_lowercase()))
    });

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

async fn run_once(config: TomlConfig) -> Result<ExitCode> {
    if config.library.roots.is_empty() {
        anyhow::bail!("No library roots given on the command line or in [library] roots");
    }

    let service = IngestService::from_config(config, EventBus::new(100))
        .await
        .context("Failed to initialize ingest service")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let summary = service.run_once(RunTrigger::Manual, &cancel).await;

    if summary.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_daemon(config: TomlConfig) -> Result<ExitCode> {
    let service = Arc::new(
        IngestService::from_config(config, EventBus::new(100))
            .await
            .context("Failed to initialize ingest service")?,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    service.run_daemon(cancel).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cache_command(config: &TomlConfig, action: CacheAction) -> Result<ExitCode> {
    let cache = SqliteCache::open(&config.cache.path)
        .await
        .with_context(|| format!("Failed to open cache at {}", config.cache.path.display()))?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::Clear => {
            cache.clear().await.context("Failed to clear cache")?;
            println!("Cache cleared: {}", config.cache.path.display());
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired().await.context("Failed to purge cache")?;
            println!("Removed {} expired entries", removed);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn config_command(config: &TomlConfig, path: &Path, action: ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            println!("# {}", path.display());
            println!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::write_toml_config(&TomlConfig::default(), path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
