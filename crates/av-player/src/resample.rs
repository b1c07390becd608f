//! Speed-aware resample stage.
//!
//! Uses Rubato to time-stretch decoded interleaved `f32` audio: the input is treated
//! as if it were sampled at `native_rate * speed` and converted to the output
//! rate, so playback runs `speed` times faster at the device rate. The same
//! conversion covers devices that cannot run at the source rate. When the scaled
//! input rate equals the output rate the stage is a passthrough.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::PlayerError;

/// Bytes per output sample (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Highest rate the input may be interpreted at.
pub const MAX_INPUT_RATE: u32 = 768_000;

/// Relative float comparison used for speed and volume changes.
pub fn fuzzy_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-5 * a.abs().min(b.abs())
}

/// Streaming resampler whose input rate follows the playback speed.
pub struct SpeedResampler {
    channels: usize,
    native_rate: u32,
    output_rate: u32,
    speed: f64,
    chunk_frames: usize,
    /// `None` when the input rate equals the output rate.
    inner: Option<Box<dyn Resampler<f32> + Send>>,
    /// Interleaved input waiting for a full chunk.
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl std::fmt::Debug for SpeedResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedResampler")
            .field("channels", &self.channels)
            .field("native_rate", &self.native_rate)
            .field("output_rate", &self.output_rate)
            .field("speed", &self.speed)
            .field("passthrough", &self.inner.is_none())
            .finish()
    }
}

impl SpeedResampler {
    /// Build a resampler for `channels` at `native_rate`, playing at `speed` and
    /// producing `native_rate` output.
    pub fn new(
        channels: usize,
        native_rate: u32,
        speed: f64,
        chunk_frames: usize,
    ) -> Result<Self, PlayerError> {
        Self::with_output_rate(channels, native_rate, native_rate, speed, chunk_frames)
    }

    /// Like [`Self::new`], converting to `output_rate` (the device rate).
    pub fn with_output_rate(
        channels: usize,
        native_rate: u32,
        output_rate: u32,
        speed: f64,
        chunk_frames: usize,
    ) -> Result<Self, PlayerError> {
        if channels == 0 || native_rate == 0 || output_rate == 0 {
            return Err(PlayerError::Resampler(format!(
                "invalid stream format: {channels} channels at {native_rate} Hz to {output_rate} Hz"
            )));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlayerError::Resampler(format!("invalid speed {speed}")));
        }
        let chunk_frames = chunk_frames.max(1);
        let input_rate = scaled_rate(native_rate, speed);
        if input_rate > MAX_INPUT_RATE {
            return Err(PlayerError::Resampler(format!(
                "input rate {input_rate} Hz exceeds {MAX_INPUT_RATE} Hz"
            )));
        }
        let inner = if input_rate == output_rate {
            tracing::debug!(rate_hz = output_rate, "resample skipped");
            None
        } else {
            let f_ratio = output_rate as f64 / input_rate as f64;
            let sinc_len = 128;
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: calculate_cutoff(sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window,
            };
            let resampler = Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| PlayerError::Resampler(format!("{e}")))?;
            tracing::debug!(
                from_hz = input_rate,
                to_hz = output_rate,
                speed,
                "resampler built"
            );
            Some(Box::new(resampler) as Box<dyn Resampler<f32> + Send>)
        };
        Ok(Self {
            channels,
            native_rate,
            output_rate,
            speed,
            chunk_frames,
            inner,
            pending: Vec::new(),
            scratch: Vec::new(),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Rate of the produced samples.
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Rate the input is interpreted at: `native_rate * speed`.
    pub fn input_rate(&self) -> u32 {
        scaled_rate(self.native_rate, self.speed)
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Worst-case output frames produced by feeding `input_frames` more frames.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        match &self.inner {
            None => input_frames,
            Some(r) => {
                let pending_frames = self.pending.len() / self.channels;
                let chunks = (pending_frames + input_frames) / self.chunk_frames + 1;
                chunks * r.output_frames_max()
            }
        }
    }

    /// Resample interleaved `input`, appending whatever output is ready to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), PlayerError> {
        if self.inner.is_none() {
            out.extend_from_slice(input);
            return Ok(());
        }
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let end = consumed + chunk_samples;
            self.run_chunk(consumed, end, None, out)?;
            consumed = end;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Push the partially filled tail chunk through (end of stream).
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), PlayerError> {
        if self.inner.is_none() || self.pending.is_empty() {
            return Ok(());
        }
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            self.pending.resize(self.chunk_frames * self.channels, 0.0);
            let len = self.pending.len();
            self.run_chunk(0, len, Some(tail_frames), out)?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Drop buffered input and internal filter state.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(r) = self.inner.as_mut() {
            r.reset();
        }
    }

    fn run_chunk(
        &mut self,
        start: usize,
        end: usize,
        partial_len: Option<usize>,
        out: &mut Vec<f32>,
    ) -> Result<(), PlayerError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(());
        };
        let channels = self.channels;
        let out_frames = resampler.output_frames_max();
        self.scratch.resize(out_frames * channels, 0.0);

        let input = InterleavedSlice::new(&self.pending[start..end], channels, self.chunk_frames)
            .map_err(|e| PlayerError::Resampler(format!("input slice: {e}")))?;
        let mut output = InterleavedSlice::new_mut(&mut self.scratch, channels, out_frames)
            .map_err(|e| PlayerError::Resampler(format!("output slice: {e}")))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| PlayerError::Resampler(format!("{e}")))?;
        out.extend_from_slice(&self.scratch[..nbr_out * channels]);
        Ok(())
    }
}

fn scaled_rate(native_rate: u32, speed: f64) -> u32 {
    (native_rate as f64 * speed).round().max(1.0) as u32
}

/// Convert `f32` samples to native-endian s16 bytes; returns bytes written.
pub fn write_s16(samples: &[f32], dst: &mut [u8]) -> usize {
    let n = samples.len().min(dst.len() / BYTES_PER_SAMPLE);
    for (s, out) in samples[..n]
        .iter()
        .zip(dst.chunks_exact_mut(BYTES_PER_SAMPLE))
    {
        let v = <i16 as cpal::Sample>::from_sample::<f32>(s.clamp(-1.0, 1.0));
        out.copy_from_slice(&v.to_ne_bytes());
    }
    n * BYTES_PER_SAMPLE
}

/// Scale native-endian s16 samples in place, saturating at the 16-bit range.
///
/// Unity volume leaves the bytes untouched.
pub fn apply_volume(bytes: &mut [u8], volume: f32) {
    if fuzzy_eq(volume as f64, 1.0) {
        return;
    }
    for chunk in bytes.chunks_exact_mut(BYTES_PER_SAMPLE) {
        let s = i16::from_ne_bytes([chunk[0], chunk[1]]);
        let scaled = (s as f32 * volume)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        chunk.copy_from_slice(&scaled.to_ne_bytes());
    }
}
