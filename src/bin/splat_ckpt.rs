use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::backend::NdArray;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use splat_checkpoint::checkpoint::{read_record, CheckpointManager};
use splat_checkpoint::config::AppConfig;
use splat_checkpoint::scene::GaussianModel;

type InspectBackend = NdArray<f32>;

/// Inspect and locate Gaussian-splat training checkpoints.
#[derive(Parser)]
#[command(name = "splat-ckpt", about = "Inspect Gaussian-splat training checkpoints")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the contents of a checkpoint file
    Inspect {
        path: PathBuf,
    },
    /// Print the newest checkpoint in a directory
    Latest {
        /// Checkpoint directory (defaults to the configured one)
        dir: Option<PathBuf>,
    },
    /// Print a configuration file with all default values
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Inspect { path } => inspect(&path),
        Command::Latest { dir } => {
            let mut config = AppConfig::load_or_default(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            if let Some(dir) = dir {
                config.checkpoint.checkpoint_dir = dir;
            }
            latest(CheckpointManager::new(config.checkpoint))
        }
        Command::DefaultConfig => {
            print!("{}", AppConfig::default_toml());
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn inspect(path: &Path) -> Result<()> {
    let device = Default::default();
    let record = read_record::<InspectBackend>(path, &device)
        .with_context(|| format!("reading checkpoint {}", path.display()))?;

    println!("Checkpoint: {}", path.display());
    println!("  step:            {}", record.step);
    println!("  model state:     {} bytes", record.model.len());
    println!("  optimizer state: {} bytes", record.optimizer.len());
    println!(
        "  host rng:        {}",
        if record.rng_state.is_some() { "present" } else { "absent" }
    );
    match &record.device_rng_states {
        Some(states) => println!("  device rngs:     {}", states.len()),
        None => println!("  device rngs:     absent"),
    }

    match GaussianModel::<InspectBackend>::from_state(&record.model, &device) {
        Ok(model) => {
            println!("  points:          {}", model.num_points());
            println!(
                "  sh degree:       {} / {}",
                model.active_sh_degree(),
                model.max_sh_degree()
            );
        }
        Err(err) => println!("  model:           not a Gaussian model ({err})"),
    }

    if let Some(extra) = &record.extra {
        let json = serde_json::to_string_pretty(extra).context("formatting extra data")?;
        println!("  extra:\n{json}");
    }

    Ok(())
}

fn latest(manager: CheckpointManager) -> Result<()> {
    let dir = &manager.config().checkpoint_dir;
    let checkpoints = manager
        .list_checkpoints()
        .with_context(|| format!("listing checkpoints in {}", dir.display()))?;

    match checkpoints.last() {
        Some((step, path)) => {
            println!("{}", path.display());
            tracing::info!(
                "Latest of {} checkpoint(s) is step {}",
                checkpoints.len(),
                step
            );
        }
        None => println!("No checkpoint found in {}", dir.display()),
    }
    Ok(())
}
