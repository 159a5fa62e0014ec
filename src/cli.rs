use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anistream")]
#[command(author, version, about = "Episode ingestion and HLS packaging pipeline")]
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
    /// Download, inspect, and package one source into HLS playlists
    Process {
        /// Deterministic stream id (also the output directory name)
        #[arg(required = true)]
        stream_id: String,

        /// Source media URL
        #[arg(required = true)]
        url: String,

        /// Package the full quality ladder instead of one rendition
        #[arg(long)]
        adaptive: bool,
    },

    /// Probe a media file and display its tracks
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove stored streams
    Cleanup {
        /// Remove only this stream id (sweeps stale streams otherwise)
        stream_id: Option<String>,

        /// Override the configured retention window, in minutes
        #[arg(long)]
        max_age_minutes: Option<u64>,
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
