use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "player", version, about = "Play a video file with audio-clocked sync")]
pub struct Args {
    /// Media file to play
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Initial volume multiplier (0.0 - 3.0)
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Initial playback speed (0.5 - 2.0)
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Start position in milliseconds
    #[arg(long)]
    pub start_ms: Option<u64>,

    /// Print media information and exit
    #[arg(long)]
    pub info: bool,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    pub json: bool,

    /// Do not read interactive commands from stdin
    #[arg(long)]
    pub no_input: bool,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Requested audio device buffer size in frames
    #[arg(long, default_value_t = 2048)]
    pub buffer_frames: u32,

    /// Write presented frames as PPM images into this directory
    #[arg(long)]
    pub dump_frames: Option<PathBuf>,

    /// Dump every Nth presented frame
    #[arg(long, default_value_t = 30, requires = "dump_frames")]
    pub dump_every: u64,
}
