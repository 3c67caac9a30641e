//! Scarab entrypoint: reference-assisted assembly of target contigs into
//! chromosome-scale scaffolds.

mod debug;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use pipeline::{run, PipelineOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "scarab",
    version,
    about = "Comparative assembly with multiple references"
)]
struct Args {
    /// Path to the recipe file.
    #[arg(value_name = "recipe_file")]
    recipe: PathBuf,
    /// Path to the working directory.
    #[arg(short = 'o', long = "outdir", default_value = "scarab-out")]
    out_dir: PathBuf,
    /// Backend for synteny block decomposition.
    #[arg(
        short = 's',
        long = "synteny",
        default_value = "sibelia",
        value_parser = ["sibelia", "cactus", "maf", "hal"]
    )]
    synteny: String,
    /// Disable refinement with the assembly overlap graph.
    #[arg(long = "no-refine")]
    no_refine: bool,
    /// Overwrite existing synteny blocks.
    #[arg(long = "overwrite")]
    overwrite: bool,
    /// Try to resolve repeats before constructing the breakpoint graph.
    #[arg(long = "repeats")]
    resolve_repeats: bool,
    /// Enable debug output.
    #[arg(long = "debug")]
    debug: bool,
    /// Number of threads for the synteny backend.
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    threads: usize,
}

/// Console layer filtered by verbosity, plus a full log file in the output
/// directory. The guard must stay alive for the file writer to flush.
fn configure_logging(out_dir: &Path, debug: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(out_dir)?;
    let log_path = out_dir.join("scarab.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }
    let file_appender = tracing_appender::rolling::never(out_dir, "scarab.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .without_time(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match configure_logging(&args.out_dir, args.debug) {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("cannot set up logging: {error}");
            None
        }
    };

    if let Err(error) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
    {
        // A pool may already exist in tests; the default one works too.
        tracing::debug!(target: "runtime", %error, "rayon pool left at defaults");
    }

    info!(target: "runtime", version = env!("CARGO_PKG_VERSION"), "scarab started");
    let options = PipelineOptions {
        recipe: args.recipe,
        out_dir: args.out_dir,
        synteny: args.synteny,
        no_refine: args.no_refine,
        overwrite: args.overwrite,
        resolve_repeats: args.resolve_repeats,
        debug: args.debug,
        threads: args.threads,
    };
    match run(&options) {
        Ok(()) => {
            info!(target: "runtime", "your scaffolds are ready");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(target: "runtime", "an error occurred while scaffolding:");
            error!(target: "runtime", "{error}");
            ExitCode::FAILURE
        }
    }
}
