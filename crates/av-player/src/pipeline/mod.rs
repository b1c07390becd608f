//! Decode pipelines: the audio pipeline pulled by the output device and the
//! timer-driven video pump.

use std::sync::{Arc, Mutex, TryLockError};

pub mod audio;
pub mod video;

pub use audio::AudioPipeline;
pub use video::{FrameTimer, TickOutcome, VideoPipeline};

/// Handle the audio output callback uses to reach the pipeline.
///
/// Never blocks: when a command currently holds the pipeline (seek, speed change)
/// the callback gets silence for that period.
#[derive(Clone)]
pub struct AudioPull {
    inner: Arc<Mutex<AudioPipeline>>,
}

impl AudioPull {
    pub fn new(inner: Arc<Mutex<AudioPipeline>>) -> Self {
        Self { inner }
    }

    /// Fill `out` completely with s16 interleaved bytes.
    pub fn pull(&self, out: &mut [u8]) {
        match self.inner.try_lock() {
            Ok(mut pipeline) => pipeline.pull(out),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().pull(out),
            Err(TryLockError::WouldBlock) => out.fill(0),
        }
    }
}
