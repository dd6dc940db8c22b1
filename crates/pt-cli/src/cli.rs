//! Command-line argument definitions.

use std::path::PathBuf;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Args, Parser, Subcommand};
use pt_log::LogFormat;

use crate::output::OutputFormat;

/// Presence tracker for VK users.
///
/// Watches users go online and offline in real time, and turns recorded
/// presence logs into per-user online time.
#[derive(Debug, Parser)]
#[command(name = "pt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Poll users and report every status change.
    Track(TrackArgs),

    /// Compute total online time per user from a recorded log.
    Streaks(StreaksArgs),
}

/// Parses a log format while listing its values in `--help`.
fn log_format_parser() -> impl TypedValueParser<Value = LogFormat> {
    PossibleValuesParser::new([LogFormat::Csv.as_str(), LogFormat::Json.as_str()])
        .try_map(|value| value.parse::<LogFormat>())
}

#[derive(Debug, Args)]
pub struct TrackArgs {
    /// User IDs or screen names to track.
    #[arg(required = true)]
    pub users: Vec<String>,

    /// Seconds between polls (defaults to `poll_interval_secs` from config).
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Write notifications to this file (replacing it) instead of stdout.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Append every acquired snapshot to a recorded log.
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Encoding of the recorded log.
    #[arg(long, default_value = "csv", value_parser = log_format_parser())]
    pub record_format: LogFormat,
}

#[derive(Debug, Args)]
pub struct StreaksArgs {
    /// Recorded log to read.
    pub input: PathBuf,

    /// Output file (stdout when omitted).
    pub output: Option<PathBuf>,

    /// Encoding of the input log.
    #[arg(long, default_value = "csv", value_parser = log_format_parser())]
    pub input_format: LogFormat,

    /// Output encoding.
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub output_format: OutputFormat,
}
