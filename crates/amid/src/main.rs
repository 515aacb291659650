//! amid: the AMI telemetry pipeline daemon.
//!
//! # Usage
//!
//! ```text
//! amid run --config ami.toml --workers 4 --persist-dir /var/lib/ami
//! amid config --config ami.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use ami_core::AmiConfig;
use ami_core::cadence::parse_duration;
use ami_source::SegmentRegistry;
use amid::{Orchestrator, PipelineContext};

#[derive(Parser)]
#[command(name = "amid", about = "AMI telemetry pipeline daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestration loop until Ctrl-C or the cycle limit.
    Run {
        /// Path to ami.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        workers: Option<u32>,

        #[arg(long)]
        graph_managers: Option<u32>,

        #[arg(long)]
        monitors: Option<u32>,

        /// Client slots reserved in every table.
        #[arg(long)]
        max_clients: Option<u32>,

        /// Directory for table snapshots.
        #[arg(long)]
        persist_dir: Option<PathBuf>,

        /// Path base of the file-backed source (reads `<base>_file.dat`).
        #[arg(long)]
        file_path_base: Option<String>,

        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,

        /// Pause between cycles, e.g. "100ms" or "1s".
        #[arg(long)]
        interval: Option<String>,
    },
    /// Print the effective configuration as JSON.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AmiConfig> {
    let config = match path {
        Some(path) => AmiConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AmiConfig::default(),
    };
    Ok(config.with_env())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,amid=debug,ami=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            workers,
            graph_managers,
            monitors,
            max_clients,
            persist_dir,
            file_path_base,
            cycles,
            interval,
        } => {
            let mut config = load_config(config.as_deref())?;
            let population = &mut config.population;
            population.workers = workers.unwrap_or(population.workers);
            population.graph_managers = graph_managers.unwrap_or(population.graph_managers);
            population.monitors = monitors.unwrap_or(population.monitors);
            population.max_clients = max_clients.unwrap_or(population.max_clients);
            if let Some(dir) = persist_dir {
                config.persist.dir = dir;
            }
            let config = config.with_file_path_base(file_path_base);

            let pacing = match interval.as_deref() {
                Some(s) => parse_duration(s).with_context(|| format!("invalid --interval {s}"))?,
                None => std::time::Duration::ZERO,
            };
            run(config, cycles, pacing).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(
    config: AmiConfig,
    cycles: Option<u64>,
    pacing: std::time::Duration,
) -> anyhow::Result<()> {
    info!("AMI daemon starting");

    std::fs::create_dir_all(&config.persist.dir)
        .with_context(|| format!("creating {}", config.persist.dir.display()))?;

    let ctx = PipelineContext::bootstrap(config, SegmentRegistry::new())?;
    let mut orchestrator = Orchestrator::new(ctx).with_pacing(pacing);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let completed = orchestrator.run(shutdown_rx, cycles).await?;

    let verdicts = orchestrator.context().monitor.verdicts();
    info!(
        cycles = completed,
        verdicts = %serde_json::to_string(&verdicts)?,
        "AMI daemon stopped"
    );
    Ok(())
}
