//! Viewer: plays a chunked media document described by a TOML manifest.
//!
//! Chunks are read from a directory (one file per chunk identifier), audio is
//! decoded with Symphonia and played via CPAL, video frames go to a headless
//! logging display and progress is reported through `tracing`.

mod cli;
mod manifest;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,viewer=info,media_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match &args.cmd {
        Some(cli::Command::Play { manifest }) => runtime::run_play(&args, manifest),
        Some(cli::Command::Inspect { manifest }) => runtime::run_inspect(manifest),
        None => Err(anyhow::anyhow!("missing command (try `viewer play <manifest>`)")),
    }
}
