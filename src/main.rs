// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! stagehand command-line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stagehand::capacity::CapacityProber;
use stagehand::config::AgentConfig;
use stagehand::jackett::JackettClient;
use stagehand::placement::PlacementLoop;
use stagehand::qbit::QbitClient;
use stagehand::server::{shutdown_signal, Server};
use stagehand::utils::format_bytes;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// stagehand - sorts finished downloads onto the emptiest drive.
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version = VERSION)]
#[command(about = "Moves completed downloads from staging onto the managed volume with the most free space.")]
#[command(long_about = "stagehand - download placement agent\n\n\
    Run the agent:       stagehand (or: stagehand serve)\n\
    One pass only:       stagehand sort-once\n\
    Check drives:        stagehand volumes\n\
    Test a name:         stagehand classify \"Show.Name.S01E02\"")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ~/.stagehand/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP endpoints and the placement loop (default)
    Serve,

    /// Run one placement cycle and exit
    SortOnce,

    /// Show free space on every managed volume
    Volumes,

    /// Print the category a release name would be filed under
    Classify {
        /// Release name
        name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AgentConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Classify { name } => {
            println!("{}", stagehand::classify(&name));
            Ok(())
        }
        Commands::Volumes => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(show_volumes(&config));
            Ok(())
        }
        Commands::SortOnce => {
            config.validate()?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(sort_once(config))
        }
        Commands::Serve => {
            config.validate()?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(serve(config))
        }
    }
}

fn qbit_client(config: &AgentConfig) -> Result<Arc<QbitClient>> {
    let client = QbitClient::with_session_config(
        &config.qbit_url,
        &config.qbit_user,
        &config.qbit_pass,
        config.session_config(),
    )?;
    Ok(Arc::new(client))
}

async fn serve(config: AgentConfig) -> Result<()> {
    config.log_summary();

    let qbit = qbit_client(&config)?;
    let jackett = JackettClient::new(&config.jackett_url, &config.jackett_api_key);

    let placement = PlacementLoop::new(qbit.clone(), config.volumes.clone(), &config.staging_dir)
        .with_interval(config.poll_interval());
    let status = placement.status();

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let placement_handle = placement.spawn(shutdown.clone());

    let server = Server::new(qbit, jackett, status)
        .with_port(config.port)
        .with_bind_address(&config.bind_address);
    let served = server.start(shutdown.clone()).await;

    // Server failed or drained: stop the loop either way
    shutdown.cancel();
    if let Err(e) = placement_handle.await {
        tracing::error!("placement loop task failed: {}", e);
    }

    served
}

async fn sort_once(config: AgentConfig) -> Result<()> {
    let qbit = qbit_client(&config)?;
    let mut placement = PlacementLoop::new(qbit, config.volumes.clone(), &config.staging_dir);

    let report = placement
        .run_cycle()
        .await
        .context("placement cycle aborted")?;

    println!(
        "listed {}, already placed {}, moved {}, failed {}",
        report.listed,
        report.already_placed,
        report.moved.len(),
        report.failures.len()
    );
    for decision in &report.moved {
        println!("  moved  {} -> {}", decision.name, decision.destination.display());
    }
    for failure in &report.failures {
        println!("  failed {}: {}", failure.name, failure.error);
    }
    Ok(())
}

async fn show_volumes(config: &AgentConfig) {
    let prober = CapacityProber::new();

    for reading in prober.readings(&config.volumes).await {
        let free = match reading.free_bytes {
            Some(bytes) => format_bytes(bytes),
            None => "not mounted".to_string(),
        };
        println!(
            "{:<4} {:<12} {:<24} {}",
            reading.volume.label,
            reading.volume.name,
            reading.volume.path.display(),
            free
        );
    }

    match prober.best_volume(&config.volumes).await {
        Some((volume, free)) => println!("\nNext placement: {} ({} free)", volume.name, format_bytes(free)),
        None => println!("\nNo managed volume is reachable"),
    }
}
