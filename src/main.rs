//! Frame timing and CPU profile analysis for managed runtime traces

#![deny(missing_docs)]

mod calltree;
mod duration;
mod frames;

use clap::{Args, Parser, Subcommand};
use log::debug;
use runtime_timeline::{CpuProfileLoadError, TraceLoadError};
use std::{io, path::PathBuf, process::ExitCode};
use thiserror::Error;

/// Analyze the timeline and CPU profile of a managed runtime
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct CliArgs {
    /// Maximal number of terminal columns to be used in the display
    #[clap(short = 'c', long = "cols", default_value = "200", global = true)]
    max_cols: u16,

    /// Kind of analysis to be performed
    #[clap(subcommand)]
    command: Command,
}

/// Analysis that rtprof can perform
#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct rendering frames from a timeline trace and report jank
    Frames(FramesArgs),

    /// Display the call tree of a sampled CPU profile
    Cpu(CpuArgs),
}

/// Options of the frame analysis
#[derive(Args, Debug)]
pub struct FramesArgs {
    /// JSON file with timeline session settings, overridden by other options
    #[clap(long)]
    config: Option<PathBuf>,

    /// Number of events that each thread may hold back for reordering
    #[clap(short, long)]
    window: Option<usize>,

    /// Maximal number of incomplete frames that are kept around
    #[clap(long)]
    pending_capacity: Option<usize>,

    /// Number of frame completions after which an incomplete frame is dropped
    #[clap(long)]
    max_age: Option<u64>,

    /// Frame rate which the application targets
    #[clap(long)]
    fps: Option<f64>,

    /// Thread id of the UI thread, if thread names do not tell
    #[clap(long)]
    ui_track: Option<i64>,

    /// Thread id of the raster thread, if thread names do not tell
    #[clap(long)]
    raster_track: Option<i64>,

    /// Only list janky frames
    #[clap(short, long)]
    janky_only: bool,

    /// Number of recent anomalies to be listed
    #[clap(long, default_value = "10")]
    anomalies: usize,

    /// Timeline trace in the Chrome Trace Event format
    input: PathBuf,
}

/// Options of the CPU profile analysis
#[derive(Args, Debug)]
pub struct CpuArgs {
    /// Smallest self-sample percentage that the flat profile displays
    #[clap(short, long, default_value = "0.5")]
    self_threshold: f64,

    /// Smallest inclusive sample percentage that the call tree displays
    #[clap(short = 't', long, default_value = "0.5")]
    hierarchical_threshold: f64,

    /// Only consider samples taken from this timestamp on (µs)
    #[clap(long)]
    start: Option<f64>,

    /// Only consider samples taken before this timestamp (µs)
    #[clap(long)]
    end: Option<f64>,

    /// CPU profile response in JSON format
    input: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = CliArgs::parse();
    debug!("Running with {args:?}");

    // Determine column budget
    let max_cols = termion::terminal_size()
        .map(|(width, _height)| width.min(args.max_cols))
        .unwrap_or(args.max_cols);

    let result = match args.command {
        Command::Frames(frames_args) => frames::run(frames_args),
        Command::Cpu(cpu_args) => calltree::run(cpu_args, max_cols),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rtprof: {e}");
            ExitCode::FAILURE
        }
    }
}

/// What can go wrong in an rtprof run
#[derive(Debug, Error)]
pub enum CliError {
    /// Failed to load the timeline trace
    #[error("{0}")]
    Trace(#[from] TraceLoadError),

    /// Failed to load the CPU profile
    #[error("{0}")]
    Profile(#[from] CpuProfileLoadError),

    /// Failed to load the session settings
    #[error("failed to load settings ({0})")]
    Config(#[from] ConfigError),

    /// Failed to write the report
    #[error("failed to write report ({0})")]
    Output(#[from] io::Error),
}

/// What can go wrong while loading session settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the settings file
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Failed to parse the settings file
    #[error("{0}")]
    Parse(#[from] serde_json::Error),
}
