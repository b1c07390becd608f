//! Concrete media backends.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod symphonia;

use std::path::Path;

use crate::error::PlayerError;
use crate::source::{Demuxer, MediaBackend};

pub use self::symphonia::SymphoniaBackend;
#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegBackend;

/// Audio through Symphonia, video through FFmpeg when built with the `ffmpeg` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultBackend {
    audio: SymphoniaBackend,
    #[cfg(feature = "ffmpeg")]
    video: FfmpegBackend,
}

impl DefaultBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this build can decode video at all.
    pub fn supports_video() -> bool {
        cfg!(feature = "ffmpeg")
    }
}

impl MediaBackend for DefaultBackend {
    fn open_audio(&self, path: &Path) -> Result<Box<dyn Demuxer + Send>, PlayerError> {
        self.audio.open_audio(path)
    }

    #[cfg(feature = "ffmpeg")]
    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError> {
        self.video.open_video(path)
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError> {
        tracing::warn!(path = %path.display(), "video decoding unavailable in this build");
        Err(PlayerError::DecoderInit(
            "video decoding requires the `ffmpeg` feature".to_string(),
        ))
    }
}
