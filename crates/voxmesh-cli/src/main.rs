//! voxmesh: convert labeled voxel volumes into repaired surface meshes.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=voxmesh=info` - Basic operation logging
//! - `RUST_LOG=voxmesh=debug` - Detailed progress logging
//! - `RUST_LOG=voxmesh::timing=debug` - Performance timing
//!
//! # Example
//!
//! ```bash
//! # Convert a segmentation volume with the default pipeline
//! voxmesh convert scan_seg.vxl -o meshes/ --colors labels.json
//!
//! # Plain threshold extraction, no per-voxel labels
//! voxmesh convert ct.vxl -o meshes/ --threshold 300
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use voxmesh::HoleFillMethod;

mod commands;
mod output;

use commands::{convert, info};

/// voxmesh - labeled voxel volumes to repaired, colored surface meshes.
#[derive(Parser)]
#[command(name = "voxmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FillMethod {
    /// Triangulated convex hull of each hole, oriented outward
    Convex,
    /// Fan triangulation, adequate for flat clipped-plane holes
    Planar,
}

impl From<FillMethod> for HoleFillMethod {
    fn from(method: FillMethod) -> Self {
        match method {
            FillMethod::Convex => HoleFillMethod::Convex,
            FillMethod::Planar => HoleFillMethod::Planar,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a volume (or a directory of volumes) into mesh files
    Convert {
        /// Input .vxl volume file, or a directory of them
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Label color catalog (JSON list of {id, name, color})
        #[arg(long)]
        colors: Option<PathBuf>,

        /// Single-label threshold mode: extract value > threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Laplacian smoothing passes (0 disables)
        #[arg(long, default_value = "10")]
        smoothing_iterations: usize,

        /// Fraction of faces to keep in decimation, in (0, 1]
        #[arg(long, default_value = "0.5")]
        decimation_fraction: f64,

        /// Disable boundary repair
        #[arg(long)]
        no_close_boundaries: bool,

        /// Hole triangulation strategy
        #[arg(long, value_enum, default_value = "convex")]
        hole_filling: FillMethod,

        /// Holes with more boundary vertices than this are left open
        #[arg(long, default_value = "500")]
        max_hole_size: usize,
    },

    /// Display volume dimensions, spacing and label inventory
    Info {
        /// Input .vxl volume file
        input: PathBuf,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "voxmesh=info",
            2 => "voxmesh=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Convert {
            input,
            output,
            colors,
            threshold,
            smoothing_iterations,
            decimation_fraction,
            no_close_boundaries,
            hole_filling,
            max_hole_size,
        } => convert::run(
            input,
            output,
            colors.as_deref(),
            *threshold,
            *smoothing_iterations,
            *decimation_fraction,
            !*no_close_boundaries,
            (*hole_filling).into(),
            *max_hole_size,
            &cli,
        ),
        Commands::Info { input } => info::run(input, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(vox_err) = e.downcast_ref::<voxmesh::VoxError>() {
                eprintln!("{}: {}", "Error".red().bold(), vox_err);
                eprintln!("  {}: {}", "Code".cyan(), vox_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    vox_err.recovery_suggestion()
                );
                if let Some(location) = vox_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
