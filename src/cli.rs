use clap::{Parser, Subcommand};
use dms_av::{parse_duration_sexagesimal, Profile};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dms")]
#[command(author, version, about = "DLNA/UPnP media-serving core")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a media file and list its streams
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the generic-profile stream plan for a file
    Plan {
        /// File to plan
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transcode a file and write the stream to a file or stdout
    Transcode {
        /// Source file
        #[arg(required = true)]
        file: PathBuf,

        /// Target profile: generic, vp8, chromecast or web
        #[arg(short, long)]
        profile: Option<Profile>,

        /// Seek offset (H:MM:SS[.frac], MM:SS or seconds)
        #[arg(long, value_parser = parse_duration_arg, default_value = "0")]
        start: Duration,

        /// Maximum output duration
        #[arg(long, value_parser = parse_duration_arg)]
        length: Option<Duration>,

        /// Output file; `-` or omitted writes to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration_sexagesimal(s).ok_or_else(|| format!("invalid duration '{s}'"))
}
