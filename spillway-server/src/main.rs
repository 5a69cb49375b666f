mod config;
use anyhow::Context;
use clap::{Parser, Subcommand};
use crate::config::Config;
use spillway_core::{Pipeline, StorageGateway};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "spillway")]
#[command(about = "Drains finished files from a watched directory into object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan and upload until interrupted
    Run {
        /// Path to configuration file; environment variables alone are enough
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Validate configuration and make sure the bucket is reachable, then exit
    Check {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spillway=info,spillway_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => run(config.as_deref()).await,
        Commands::Check { config } => check(config.as_deref()).await,
    };

    if let Err(error) = result {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).context("failed to load config")?;
    let pipeline_config = cfg.pipeline_config().context("invalid pipeline config")?;

    tracing::info!(
        "Starting Spillway: root={} bucket={} prefix={:?} backend={}",
        pipeline_config.watch_root.display(),
        cfg.storage.bucket,
        pipeline_config.key_prefix,
        cfg.storage.backend
    );

    // The only fatal storage failure: the client cannot be constructed at all.
    let gateway = cfg
        .gateway_builder()?
        .build()
        .await
        .context("failed to initialize storage gateway")?;

    let pipeline = Pipeline::new(pipeline_config, gateway)?;
    let report = pipeline.run(shutdown_signal()).await;

    tracing::info!(
        "Spillway stopped after {} scans; {} uploads delivered",
        report.ticks,
        report.outcomes.delivered_and_deleted + report.outcomes.delivered_but_retained
    );
    Ok(())
}

async fn check(config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).context("failed to load config")?;
    let pipeline_config = cfg.pipeline_config().context("invalid pipeline config")?;

    if !pipeline_config.watch_root.is_dir() {
        tracing::warn!(
            "Watch root {} does not exist yet",
            pipeline_config.watch_root.display()
        );
    }

    let gateway = cfg
        .gateway_builder()?
        .build()
        .await
        .context("failed to initialize storage gateway")?;
    gateway
        .ensure_bucket()
        .await
        .with_context(|| format!("bucket {} is not usable", gateway.bucket()))?;

    tracing::info!("Configuration OK; bucket {} is ready", gateway.bucket());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("Failed to listen for SIGTERM: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
