use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_core::{EventConductor, InMemoryContextProvider};
use conductor_server::config::{
    Config, ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigWarnings,
    DEFAULT_LOG_FILTER,
};
use conductor_server::{build_registry, source::build_source};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "conductor-server")]
#[command(about = "Delivers change notifications to reaction stages one at a time, in order")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Queue to listen on (overrides config and CONDUCTOR_QUEUE_ID)
    #[arg(short, long, global = true)]
    queue: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the configuration, print it as TOML and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = load_config(&cli).context("failed to load configuration")?;

    if let Some(queue) = cli.queue.clone() {
        config.conductor.queue_id = queue;
    }

    if let Some(Command::CheckConfig) = cli.command {
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => eprintln!("warning: {} ({hint})", warning.message),
                None => eprintln!("warning: {}", warning.message),
            }
        }
        let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    init_tracing(&config);
    report_config(&config, &warnings);

    run(config).await
}

fn load_config(cli: &Cli) -> Result<ConfigLoad, ConfigLoadError> {
    ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        load_env_file: true,
    })
    .load()
}

fn init_tracing(config: &Config) {
    let fallback = config
        .log_filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn report_config(config: &Config, warnings: &ConfigWarnings) {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded from file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let source = build_source(&config.source).context("failed to set up message source")?;
    let registry = build_registry(&config).context("failed to build reaction stages")?;

    if registry.is_empty() {
        warn!("no reaction stages registered; notifications will be consumed and dropped");
    }

    info!(
        queue = %config.conductor.queue_id,
        stages = ?registry.names(),
        handled_kinds = ?config.conductor.handled_kinds,
        "starting conductor"
    );

    let conductor = EventConductor::new(
        config.conductor.clone(),
        source,
        registry,
        Arc::new(InMemoryContextProvider::new()),
    );
    conductor.start().await.context("failed to start conductor")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    conductor.stop().await.context("conductor did not stop cleanly")?;

    let stats = conductor.stats();
    info!(
        received = stats.received,
        dispatched = stats.dispatched,
        filtered = stats.filtered,
        failed = stats.failed,
        empty_receives = stats.empty_receives,
        transport_errors = stats.transport_errors,
        "conductor stopped"
    );
    Ok(())
}
