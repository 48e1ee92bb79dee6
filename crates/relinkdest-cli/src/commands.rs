use clap::{ArgAction, Parser};
use relinkdest_core::{FileConfig, KeepSide, UnmatchedPolicy};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "relinkdest", version)]
#[command(
    about = "Hardlink identical files between two rsync --link-dest snapshots",
    long_about = None
)]
pub struct Cli {
    /// Older snapshot root
    #[arg(required_unless_present = "show_config")]
    pub older: Option<PathBuf>,

    /// Newer snapshot root
    #[arg(required_unless_present = "show_config")]
    pub newer: Option<PathBuf>,

    /// Which copy survives when a pair is linked (older|newer)
    #[arg(short, long, value_name = "SIDE")]
    pub keep: Option<KeepSide>,

    /// Also link identical zero-byte files
    #[arg(long)]
    pub link_empty: bool,

    /// Treat files whose mtimes differ by more than SECS as different without reading them
    #[arg(long, value_name = "SECS")]
    pub mtime_tolerance: Option<f64>,

    /// Compare everything but change nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Directories present on one side only: skip or descend
    #[arg(long, value_name = "POLICY")]
    pub unmatched: Option<UnmatchedPolicy>,

    /// Read size in bytes used for content comparison
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// Number of worker threads
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Glob of relative paths to leave alone (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Configuration file (default: ./Relinkdest.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write one row per linked, differing or failed path to FILE
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Also write logs to FILE
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors and hide the progress spinner
    #[arg(short, long)]
    pub quiet: bool,

    /// Hide the progress spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Print the resolved policy and exit
    #[arg(long)]
    pub show_config: bool,
}

impl Cli {
    /// Policy values given on the command line. Unset flags stay `None` so
    /// they do not mask the configuration file.
    pub fn file_config(&self) -> FileConfig {
        FileConfig {
            keep_side: self.keep,
            link_zero_byte_files: self.link_empty.then_some(true),
            mtime_tolerance_secs: self.mtime_tolerance,
            dry_run: self.dry_run.then_some(true),
            unmatched: self.unmatched,
            chunk_size: self.chunk_size,
            jobs: self.jobs,
            ignore_patterns: self.exclude.clone(),
        }
    }

    pub fn show_progress(&self) -> bool {
        !(self.quiet || self.no_progress || self.show_config)
    }
}
