use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "viewer", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Discard audio at real-time pace instead of opening a device
    #[arg(long)]
    pub null_output: bool,

    /// Start position in seconds
    #[arg(long)]
    pub seek: Option<f64>,

    /// Drift correction period in milliseconds (overrides the manifest)
    #[arg(long)]
    pub sync_interval_ms: Option<u64>,

    /// Chunks prefetched ahead of playback, per track (overrides the manifest)
    #[arg(long)]
    pub window_chunks: Option<usize>,

    /// Spool fetched chunks to files in this directory instead of memory
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a document described by a manifest
    Play {
        /// Path to the document manifest (TOML)
        manifest: PathBuf,
    },

    /// Validate a manifest and print its streams
    Inspect {
        /// Path to the document manifest (TOML)
        manifest: PathBuf,
    },
}
