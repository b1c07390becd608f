use std::time::Duration;

/// Playback tuning parameters shared by the audio pipeline, video pump and controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Requested audio device buffer size in frames.
    pub device_buffer_frames: u32,
    /// Lowest accepted playback speed (applies to audio and video).
    pub min_speed: f64,
    /// Highest accepted playback speed (applies to audio and video).
    pub max_speed: f64,
    /// Upper bound for the volume multiplier.
    pub max_volume: f32,
    /// Decode attempts made after a seek to warm the audio buffer.
    pub seek_warmup_chunks: usize,
    /// Packets read per video tick before giving up on that tick.
    pub video_packet_attempts: usize,
    /// Consecutive decode/read failures tolerated before treating the stream as ended.
    pub decode_retry_limit: usize,
    /// Consecutive empty reads tolerated while catching up to a seek target.
    pub seek_max_empty_reads: usize,
    /// Frames further than this before the seek target are never shown in its place.
    pub seek_skip_distance: Duration,
    /// A frame this close to the seek target counts as reaching it.
    pub seek_tolerance: Duration,
    /// Minimum audio progress between two position notifications.
    pub position_interval: Duration,
    /// Seeks inside this window after the previous one are candidates for debouncing.
    pub seek_debounce_window: Duration,
    /// Seeks closer than this to the previous target are debounced.
    pub seek_debounce_distance: Duration,
    /// Decode-time clock anchors may move the clock backward only by more than this.
    pub clock_resync_tolerance: Duration,
    /// Frame rate assumed when the stream does not report one.
    pub fallback_frame_rate: f64,
    /// Audio/video synchronizer tuning.
    pub sync: SyncConfig,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            device_buffer_frames: 2048,
            min_speed: 0.5,
            max_speed: 2.0,
            max_volume: 3.0,
            seek_warmup_chunks: 5,
            video_packet_attempts: 8,
            decode_retry_limit: 8,
            seek_max_empty_reads: 50,
            seek_skip_distance: Duration::from_secs(5),
            seek_tolerance: Duration::from_millis(100),
            position_interval: Duration::from_millis(100),
            seek_debounce_window: Duration::from_millis(50),
            seek_debounce_distance: Duration::from_millis(100),
            clock_resync_tolerance: Duration::from_millis(100),
            fallback_frame_rate: 30.0,
            sync: SyncConfig::default(),
        }
    }
}

impl PlaybackConfig {
    /// Clamp a requested speed into the configured range.
    ///
    /// Non-finite requests fall back to normal speed.
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        if !speed.is_finite() {
            return 1.0f64.clamp(self.min_speed, self.max_speed);
        }
        speed.clamp(self.min_speed, self.max_speed)
    }

    /// Clamp a requested volume into `[0, max_volume]`.
    pub fn clamp_volume(&self, volume: f32) -> f32 {
        if volume.is_nan() {
            return 1.0f32.min(self.max_volume);
        }
        volume.clamp(0.0, self.max_volume)
    }
}

/// Banded proportional correction applied by the synchronizer.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Leading frames used to estimate the startup audio/video skew.
    pub startup_frames: u32,
    /// `|diff|` below this leaves the nominal delay untouched.
    pub band_none: Duration,
    /// Upper edge of the light-correction band.
    pub band_light: Duration,
    /// Upper edge of the medium-correction band.
    pub band_medium: Duration,
    /// Delay factors `(video ahead, video behind)` per band.
    pub light_factors: (f64, f64),
    pub medium_factors: (f64, f64),
    pub strong_factors: (f64, f64),
    /// Smallest delay ever scheduled.
    pub min_delay: Duration,
    /// Largest delay ever scheduled.
    pub max_delay: Duration,
    /// Timer intervals closer than this to the armed one are not re-armed.
    pub rearm_hysteresis: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            startup_frames: 5,
            band_none: Duration::from_millis(10),
            band_light: Duration::from_millis(20),
            band_medium: Duration::from_millis(40),
            light_factors: (1.03, 0.97),
            medium_factors: (1.07, 0.93),
            strong_factors: (1.12, 0.88),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            rearm_hysteresis: Duration::from_millis(2),
        }
    }
}
