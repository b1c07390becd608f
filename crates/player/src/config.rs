use std::path::PathBuf;

use anyhow::{Result, bail};

pub use av_player::config::PlaybackConfig;

use crate::cli::Args;

/// Where and how often presented frames are written to disk.
#[derive(Clone, Debug)]
pub struct DumpConfig {
    pub dir: PathBuf,
    pub every: u64,
}

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub volume: f32,
    pub speed: f64,
    pub start_ms: Option<u64>,
    pub info_only: bool,
    pub json: bool,
    pub interactive: bool,
    pub dump: Option<DumpConfig>,
    pub playback: PlaybackConfig,
}

impl PlayerConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let Some(path) = args.path else {
            bail!("a media path is required");
        };
        if args.chunk_frames == 0 {
            bail!("--chunk-frames must be positive");
        }
        if args.buffer_frames == 0 {
            bail!("--buffer-frames must be positive");
        }
        if !args.volume.is_finite() || args.volume < 0.0 {
            bail!("--volume must be a non-negative number");
        }
        if !args.speed.is_finite() || args.speed <= 0.0 {
            bail!("--speed must be a positive number");
        }

        let playback = PlaybackConfig {
            chunk_frames: args.chunk_frames,
            device_buffer_frames: args.buffer_frames,
            ..PlaybackConfig::default()
        };
        let dump = args.dump_frames.map(|dir| DumpConfig {
            dir,
            every: args.dump_every.max(1),
        });

        Ok(Self {
            path,
            device: normalize_device_name(args.device),
            volume: playback.clamp_volume(args.volume),
            speed: playback.clamp_speed(args.speed),
            start_ms: args.start_ms,
            info_only: args.info,
            json: args.json,
            interactive: !args.no_input,
            dump,
            playback,
        })
    }
}

fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}
