//! Player: a small CLI that plays a video file with audio-clocked A/V sync.
//!
//! ## Pipeline
//! 1. **Audio**: the CPAL callback pulls decoded, speed-resampled s16 audio; every pull
//!    advances the audio clock.
//! 2. **Video**: a timer on the player thread decodes and presents frames, stretching or
//!    shrinking its interval to follow the audio clock.
//!
//! Frames go to a headless sink that counts them and can dump PPM snapshots
//! (`--dump-frames`). Interactive commands are read from stdin.

mod cli;
mod commands;
mod config;
mod runtime;
mod sink;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,av_player=info,player=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = config::PlayerConfig::from_args(args)?;
    tracing::info!(
        path = %config.path.display(),
        device = config.device.as_deref().unwrap_or("default"),
        speed = config.speed,
        volume = config.volume,
        "starting player"
    );
    runtime::run(config)
}
