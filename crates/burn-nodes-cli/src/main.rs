//! burn-nodes CLI
//!
//! Inspection tools for a burn-nodes installation:
//! - sigma schedules for the SD 1.x model table
//! - selectable configs, checkpoints and VAEs
//! - image identity hashes
//! - the file name the next save would use

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn_nodes::samplers::resolve_sigmas;
use burn_nodes::{
    CHECKPOINT_EXTENSIONS, CONFIG_EXTENSIONS, ImageSaver, ModelSampling, NodePaths,
    SamplerAlgorithm, SchedulerPolicy, image_hash, list_files,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burn-nodes")]
#[command(about = "Diffusion node tools in pure Rust")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sigma schedule a sampling run would use
    Sigmas {
        /// Scheduler policy (normal, karras, exponential, linear, simple)
        #[arg(long, default_value = "normal")]
        scheduler: String,

        /// Number of sampling steps
        #[arg(long, default_value = "20")]
        steps: usize,

        /// Fraction of the schedule to run
        #[arg(long, default_value = "1.0")]
        denoise: f32,

        /// Sampler algorithm; midpoint samplers change the schedule endpoints
        #[arg(long, default_value = "euler")]
        sampler: String,
    },

    /// List selectable model files
    Models {
        /// Installation root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// JSON path configuration overriding the root layout
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the SHA-256 identity of an image file
    Hash {
        path: PathBuf,
    },

    /// Print the file name the next save with a prefix would use
    NextName {
        /// Installation root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// JSON path configuration overriding the root layout
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "ComfyUI")]
        prefix: String,
    },
}

fn load_paths(root: &Path, config: Option<&Path>) -> Result<NodePaths> {
    match config {
        Some(path) => NodePaths::from_json_file(path)
            .with_context(|| format!("Failed to read path config {}", path.display())),
        None => Ok(NodePaths::from_root(root)),
    }
}

fn print_sigmas(scheduler: &str, steps: usize, denoise: f32, sampler: &str) -> Result<()> {
    let policy: SchedulerPolicy = scheduler.parse()?;
    let algorithm: SamplerAlgorithm = sampler.parse()?;
    let sigmas = resolve_sigmas(&ModelSampling::sd1x(), policy, algorithm, steps, denoise)
        .context("Failed to build schedule")?;

    tracing::info!(policy = policy.name(), algorithm = algorithm.name(), "schedule resolved");
    for (i, sigma) in sigmas.iter().enumerate() {
        println!("{i:>4}  {sigma:.6}");
    }
    Ok(())
}

fn print_models(paths: &NodePaths) -> Result<()> {
    let sections = [
        ("configs", &paths.configs_dir, CONFIG_EXTENSIONS),
        ("checkpoints", &paths.checkpoints_dir, CHECKPOINT_EXTENSIONS),
        ("vae", &paths.vae_dir, CHECKPOINT_EXTENSIONS),
    ];
    for (label, dir, extensions) in sections {
        let names = list_files(dir, extensions)
            .with_context(|| format!("Failed to list {label} in {}", dir.display()))?;
        tracing::debug!(label, count = names.len(), "listed model files");
        println!("{label} ({}):", dir.display());
        if names.is_empty() {
            println!("  (none)");
        }
        for name in names {
            println!("  {name}");
        }
    }
    Ok(())
}

/// Application entry point
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sigmas {
            scheduler,
            steps,
            denoise,
            sampler,
        } => print_sigmas(&scheduler, steps, denoise, &sampler),

        Commands::Models { root, config } => {
            let paths = load_paths(&root, config.as_deref())?;
            print_models(&paths)
        }

        Commands::Hash { path } => {
            let hash = image_hash(&path)
                .with_context(|| format!("Failed to hash {}", path.display()))?;
            println!("{hash}");
            Ok(())
        }

        Commands::NextName {
            root,
            config,
            prefix,
        } => {
            let paths = load_paths(&root, config.as_deref())?;
            let saver = ImageSaver::new(&paths.output_dir);
            let name = saver
                .next_filename(&prefix)
                .context("Failed to scan output directory")?;
            println!("{}", paths.output_dir.join(name).display());
            Ok(())
        }
    }
}
