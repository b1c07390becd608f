//! Audio pipeline: demux, decode, speed resample, s16 window and the audio clock.
//!
//! The output device pulls bytes through [`AudioPipeline::pull`] on its own
//! cadence. Decoding happens on demand inside the pull, one chunk at a time, and
//! the clock advances by what the device actually consumed.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use av_player_types::PlayerEvent;
use crossbeam_channel::Sender;

use crate::buffer::AudioRingBuffer;
use crate::clock::{AudioClock, ClockSource};
use crate::config::PlaybackConfig;
use crate::error::PlayerError;
use crate::resample::{self, BYTES_PER_SAMPLE, SpeedResampler};
use crate::source::{
    AudioDecoder, AudioStreamState, DecodeStatus, Demuxer, MediaBackend, MediaKind, StreamInfo,
};

/// Pipeline state other threads read or set without locking the pipeline.
#[derive(Debug)]
pub struct AudioShared {
    finished: AtomicBool,
    /// `f32` bits of the linear gain.
    volume: AtomicU32,
}

impl AudioShared {
    fn new() -> Self {
        Self {
            finished: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// `true` once the stream drained and the finish notification went out.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Store an already clamped volume; applies to buffers produced from now on.
    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }
}

/// Owns every audio resource of one opened source.
///
/// Fields drop in declaration order, the reverse of acquisition.
pub struct AudioPipeline {
    buffer: AudioRingBuffer,
    resampler: SpeedResampler,
    decoder: Box<dyn AudioDecoder + Send>,
    demuxer: Box<dyn Demuxer + Send>,
    stream: StreamInfo,
    format: AudioStreamState,
    clock: Arc<AudioClock>,
    shared: Arc<AudioShared>,
    cfg: PlaybackConfig,
    events: Sender<PlayerEvent>,
    /// Nudged once when the stream finishes.
    finish_waker: Option<Sender<()>>,
    duration: Option<f64>,
    converted: Vec<f32>,
    playing: bool,
    /// Demuxer hit end of stream and the decoder was told so.
    input_eof: bool,
    /// Resampler tail has been pushed out after the decoder drained.
    tail_flushed: bool,
    /// Nothing more will ever be decoded for this stream.
    exhausted: bool,
    last_reported: Option<f64>,
    /// Frames ending before this time are dropped (post-seek).
    discard_before: Option<f64>,
}

impl AudioPipeline {
    /// Open the best audio stream of `path` and build its decoder and resampler.
    ///
    /// Anything acquired before a failure is released on return.
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        clock: Arc<AudioClock>,
        cfg: PlaybackConfig,
        speed: f64,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, PlayerError> {
        let demuxer = backend.open_audio(path)?;
        let stream = demuxer
            .best_stream(MediaKind::Audio)
            .ok_or(PlayerError::StreamNotFound { kind: "audio" })?;
        let format = stream
            .audio()
            .cloned()
            .ok_or(PlayerError::StreamNotFound { kind: "audio" })?;
        let decoder = demuxer.open_audio_decoder(&stream)?;
        let resampler = SpeedResampler::new(
            format.channels as usize,
            format.sample_rate,
            cfg.clamp_speed(speed),
            cfg.chunk_frames,
        )?;
        let duration = demuxer.duration();
        clock.reset();

        tracing::info!(
            codec = %stream.codec,
            rate_hz = format.sample_rate,
            channels = format.channels,
            sample_format = %format.sample_format,
            "audio stream opened"
        );

        Ok(Self {
            buffer: AudioRingBuffer::new(),
            resampler,
            decoder,
            demuxer,
            stream,
            format,
            clock,
            shared: Arc::new(AudioShared::new()),
            cfg,
            events,
            finish_waker: None,
            duration,
            converted: Vec::new(),
            playing: false,
            input_eof: false,
            tail_flushed: false,
            exhausted: false,
            last_reported: None,
            discard_before: None,
        })
    }

    pub fn format(&self) -> &AudioStreamState {
        &self.format
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Handle to the lock-free part of the pipeline state.
    pub fn shared(&self) -> Arc<AudioShared> {
        self.shared.clone()
    }

    /// Send `()` on `waker` (without blocking) when the stream finishes.
    pub fn set_finish_waker(&mut self, waker: Sender<()>) {
        self.finish_waker = Some(waker);
    }

    /// Rate of the bytes handed to the device.
    pub fn output_rate(&self) -> u32 {
        self.resampler.output_rate()
    }

    pub fn speed(&self) -> f64 {
        self.resampler.speed()
    }

    /// Rate the resampler currently reads its input at.
    pub fn resampler_input_rate(&self) -> u32 {
        self.resampler.input_rate()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// `true` once the stream drained and the finish notification went out.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Duration of one device buffer; bounds pause-time clock integration.
    fn device_buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(
            self.cfg.device_buffer_frames as f64 / self.output_rate() as f64,
        )
    }

    /// Produce samples at the device `rate` instead of the source rate.
    ///
    /// Buffered output is dropped. On failure the previous resampler stays.
    pub fn set_output_rate(&mut self, rate: u32) -> Result<(), PlayerError> {
        if rate == self.output_rate() {
            return Ok(());
        }
        let rebuilt = SpeedResampler::with_output_rate(
            self.format.channels as usize,
            self.format.sample_rate,
            rate,
            self.resampler.speed(),
            self.cfg.chunk_frames,
        )?;
        tracing::info!(
            source_rate = self.format.sample_rate,
            device_rate = rate,
            "resampling to device rate"
        );
        self.resampler = rebuilt;
        self.buffer.clear();
        Ok(())
    }

    /// Fill `out` with exactly `out.len()` bytes of s16 interleaved audio.
    pub fn pull(&mut self, out: &mut [u8]) {
        if !self.playing {
            out.fill(0);
            return;
        }

        let mut filled = 0;
        let mut failures = 0;
        while filled < out.len() {
            if self.buffer.is_exhausted() {
                if self.exhausted {
                    break;
                }
                match self.decode_one_chunk() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.exhausted = true;
                        tracing::debug!("audio end of stream");
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= self.cfg.decode_retry_limit {
                            tracing::warn!(error = %e, failures, "audio decode retry limit reached");
                            self.exhausted = true;
                            break;
                        }
                        continue;
                    }
                }
            }
            filled += self.buffer.read_into(&mut out[filled..]);
        }
        out[filled..].fill(0);

        if filled > 0 {
            let bytes_per_sec =
                self.format.channels as f64 * self.output_rate() as f64 * BYTES_PER_SAMPLE as f64;
            let delta = filled as f64 / bytes_per_sec * self.resampler.speed();
            self.clock.advance(delta, Instant::now());
            self.report_position();
        }

        if self.exhausted && self.buffer.is_exhausted() && !self.shared.is_finished() {
            self.shared.finished.store(true, Ordering::Release);
            let end_ms = self
                .duration
                .map(secs_to_ms)
                .unwrap_or_else(|| secs_to_ms(self.clock.now_secs()));
            let _ = self.events.send(PlayerEvent::PositionChanged { position_ms: end_ms });
            let _ = self.events.send(PlayerEvent::PlaybackFinished);
            tracing::info!(position_ms = end_ms, "audio playback finished");
            if let Some(waker) = &self.finish_waker {
                let _ = waker.try_send(());
            }
        }
    }

    fn report_position(&mut self) {
        let now = self.clock.now_secs();
        let due = match self.last_reported {
            None => true,
            Some(last) => (now - last).abs() >= self.cfg.position_interval.as_secs_f64(),
        };
        if due {
            self.last_reported = Some(now);
            let _ = self.events.send(PlayerEvent::PositionChanged {
                position_ms: secs_to_ms(now),
            });
        }
    }

    /// Refill the s16 window with the next decoded chunk.
    ///
    /// Returns `Ok(false)` once the stream is fully drained.
    pub fn decode_one_chunk(&mut self) -> Result<bool, PlayerError> {
        if !self.buffer.is_exhausted() {
            return Ok(true);
        }
        loop {
            match self.decoder.receive_frame()? {
                DecodeStatus::Frame(frame) => {
                    if let Some(cutoff) = self.discard_before {
                        let end = frame.pts.map(|pts| {
                            pts + frame.frames() as f64 / self.format.sample_rate as f64
                        });
                        match end {
                            Some(end) if end <= cutoff => continue,
                            _ => self.discard_before = None,
                        }
                    }
                    if let Some(pts) = frame.pts {
                        self.clock
                            .observe_pts(pts, self.cfg.clock_resync_tolerance);
                    }
                    let max_frames = self.resampler.max_output_frames(frame.frames());
                    self.converted.clear();
                    self.resampler.process(&frame.samples, &mut self.converted)?;
                    if self.store_converted(max_frames)? > 0 {
                        return Ok(true);
                    }
                }
                DecodeStatus::Again => {
                    if self.input_eof {
                        return self.flush_tail();
                    }
                    match self.demuxer.read_packet()? {
                        Some(packet) if packet.stream_index == self.stream.index => {
                            self.decoder.send_packet(&packet)?;
                        }
                        Some(_) => {}
                        None => {
                            self.input_eof = true;
                            self.decoder.send_eof()?;
                        }
                    }
                }
                DecodeStatus::Drained => return self.flush_tail(),
            }
        }
    }

    fn flush_tail(&mut self) -> Result<bool, PlayerError> {
        if self.tail_flushed {
            return Ok(false);
        }
        self.tail_flushed = true;
        let max_frames = self.resampler.max_output_frames(0);
        self.converted.clear();
        self.resampler.flush(&mut self.converted)?;
        Ok(self.store_converted(max_frames)? > 0)
    }

    /// Convert `self.converted` to s16 into the window and apply volume.
    fn store_converted(&mut self, max_frames: usize) -> Result<usize, PlayerError> {
        if self.converted.is_empty() {
            return Ok(0);
        }
        let channels = self.format.channels as usize;
        let capacity = max_frames
            .max(self.converted.len() / channels)
            .saturating_mul(channels)
            .saturating_mul(BYTES_PER_SAMPLE);
        let volume = self.shared.volume();
        let samples = &self.converted;
        self.buffer.refill(capacity, |dst| {
            let n = resample::write_s16(samples, dst);
            resample::apply_volume(&mut dst[..n], volume);
            n
        })
    }

    /// Clamp and store the volume; applies to buffers produced from now on.
    pub fn set_volume(&mut self, volume: f32) {
        self.shared.set_volume(self.cfg.clamp_volume(volume));
    }

    /// Change playback speed. Returns `Ok(false)` when the speed is unchanged.
    ///
    /// The new resampler is built before anything is touched, so a failed rebuild
    /// leaves the previous configuration running.
    pub fn set_speed(&mut self, speed: f64) -> Result<bool, PlayerError> {
        let new = self.cfg.clamp_speed(speed);
        let old = self.resampler.speed();
        if resample::fuzzy_eq(old, new) {
            return Ok(false);
        }
        let rebuilt = SpeedResampler::with_output_rate(
            self.format.channels as usize,
            self.format.sample_rate,
            self.output_rate(),
            new,
            self.cfg.chunk_frames,
        )?;
        self.resampler = rebuilt;
        self.buffer.clear();
        self.decoder.flush();
        self.clock.rescale(old / new);
        tracing::info!(
            from = old,
            to = new,
            input_rate_hz = self.resampler.input_rate(),
            "audio speed changed"
        );
        Ok(true)
    }

    /// Seek to `position_ms` and warm the window with decoded audio.
    pub fn seek(&mut self, position_ms: u64) -> Result<(), PlayerError> {
        let target = position_ms as f64 / 1000.0;
        self.buffer.clear();
        self.resampler.reset();
        self.decoder.flush();
        self.demuxer
            .seek(self.stream.index, target)
            .map_err(|e| PlayerError::Seek {
                target_ms: position_ms,
                reason: e.to_string(),
            })?;
        self.clock.set(target);
        self.input_eof = false;
        self.tail_flushed = false;
        self.exhausted = false;
        self.shared.finished.store(false, Ordering::Release);
        self.last_reported = None;
        self.discard_before = Some(target);

        for _ in 0..self.cfg.seek_warmup_chunks {
            if !self.buffer.is_exhausted() {
                break;
            }
            match self.decode_one_chunk() {
                Ok(true) => {}
                Ok(false) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "audio warm-up decode failed"),
            }
        }
        tracing::debug!(
            position_ms,
            buffered = self.buffer.available(),
            "audio seek done"
        );
        Ok(())
    }

    /// Start consuming audio; the clock runs from `now`.
    pub fn play(&mut self, now: Instant) {
        self.playing = true;
        self.clock.resume_at(now);
    }

    /// Stop consuming audio; the clock integrates up to `now` and freezes.
    pub fn pause(&mut self, now: Instant) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.clock
            .pause_at(now, self.resampler.speed(), self.device_buffer_duration());
    }

    pub fn position_secs(&self) -> f64 {
        self.clock.now_secs()
    }
}

pub(crate) fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeSourceSpec};
    use crossbeam_channel::{Receiver, unbounded};

    fn open(spec: FakeSourceSpec) -> (AudioPipeline, Arc<AudioClock>, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        let clock = Arc::new(AudioClock::new());
        let backend = FakeBackend::new(spec);
        let pipeline = AudioPipeline::open(
            &backend,
            Path::new("fake.mp4"),
            clock.clone(),
            PlaybackConfig::default(),
            1.0,
            tx,
        )
        .unwrap();
        (pipeline, clock, rx)
    }

    fn device_buffer(p: &AudioPipeline) -> Vec<u8> {
        vec![0xAA; 2048 * p.format().channels as usize * BYTES_PER_SAMPLE]
    }

    #[test]
    fn open_leaves_clock_at_zero() {
        let (p, clock, _rx) = open(FakeSourceSpec::default());
        assert_eq!(clock.now_secs(), 0.0);
        assert_eq!(p.resampler_input_rate(), 48_000);
        assert_eq!(p.duration(), Some(60.0));
    }

    #[test]
    fn open_without_audio_fails() {
        let (tx, _rx) = unbounded();
        let backend = FakeBackend::new(FakeSourceSpec {
            with_audio: false,
            ..FakeSourceSpec::default()
        });
        let err = AudioPipeline::open(
            &backend,
            Path::new("fake.mp4"),
            Arc::new(AudioClock::new()),
            PlaybackConfig::default(),
            1.0,
            tx,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PlayerError::StreamNotFound { kind: "audio" }));
    }

    #[test]
    fn pull_while_paused_is_silent() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        let mut buf = device_buffer(&p);
        let len = buf.len();
        p.pull(&mut buf);
        assert_eq!(buf.len(), len);
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(clock.now_secs(), 0.0);
    }

    #[test]
    fn pull_advances_clock_by_consumed_bytes() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        let mut last = 0.0;
        for _ in 0..10 {
            p.pull(&mut buf);
            let now = clock.now_secs();
            assert!(now >= last);
            last = now;
        }
        // 10 x 2048 frames at 48 kHz.
        assert!((last - 10.0 * 2048.0 / 48_000.0).abs() < 0.03, "{last}");
        assert!(buf.iter().any(|b| *b != 0));
    }

    #[test]
    fn clock_constant_while_paused() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        p.pull(&mut buf);
        p.pause(Instant::now());
        let frozen = clock.now_secs();
        for _ in 0..5 {
            p.pull(&mut buf);
        }
        assert_eq!(clock.now_secs(), frozen);
    }

    #[test]
    fn volume_one_matches_source_and_three_saturates() {
        let (mut unity, _c1, _r1) = open(FakeSourceSpec::default());
        let (mut loud, _c2, _r2) = open(FakeSourceSpec::default());
        unity.set_volume(1.0);
        loud.set_volume(7.0);
        assert_eq!(loud.volume(), 3.0);
        unity.play(Instant::now());
        loud.play(Instant::now());

        let mut a = device_buffer(&unity);
        let mut b = device_buffer(&loud);
        unity.pull(&mut a);
        loud.pull(&mut b);

        let expected = crate::testing::expected_s16_bytes(a.len() / BYTES_PER_SAMPLE, 2);
        assert_eq!(a, expected);
        for (x, y) in a.chunks_exact(2).zip(b.chunks_exact(2)) {
            let x = i16::from_ne_bytes([x[0], x[1]]) as i32;
            let y = i16::from_ne_bytes([y[0], y[1]]) as i32;
            assert_eq!(y, (x * 3).clamp(i16::MIN as i32, i16::MAX as i32));
        }
    }

    #[test]
    fn speed_round_trip_restores_native_input_rate() {
        let (mut p, _clock, _rx) = open(FakeSourceSpec::default());
        assert!(p.set_speed(2.0).unwrap());
        assert_eq!(p.resampler_input_rate(), 96_000);
        assert!(!p.set_speed(2.0 + 1e-9).unwrap());
        assert!(p.set_speed(1.0).unwrap());
        assert_eq!(p.resampler_input_rate(), 48_000);
    }

    #[test]
    fn device_rate_output_keeps_clock_in_source_time() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        p.set_output_rate(44_100).unwrap();
        assert_eq!(p.output_rate(), 44_100);
        assert_eq!(p.resampler_input_rate(), 48_000);
        p.play(Instant::now());
        // One second of device audio in 4410-frame pulls.
        let mut buf = vec![0u8; 4410 * 2 * BYTES_PER_SAMPLE];
        for _ in 0..10 {
            p.pull(&mut buf);
        }
        let now = clock.now_secs();
        assert!((now - 1.0).abs() < 0.05, "{now}");

        assert!(p.set_speed(2.0).unwrap());
        assert_eq!(p.output_rate(), 44_100);
        assert!(p.set_output_rate(0).is_err());
        assert_eq!(p.output_rate(), 44_100);
    }

    #[test]
    fn finish_sets_shared_flag_and_wakes_once() {
        let (mut p, _clock, _rx) = open(FakeSourceSpec {
            duration: 0.5,
            ..FakeSourceSpec::default()
        });
        let shared = p.shared();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        p.set_finish_waker(wake_tx);
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        for _ in 0..30 {
            p.pull(&mut buf);
        }
        assert!(shared.is_finished());
        assert_eq!(wake_rx.try_iter().count(), 1);

        p.seek(100).unwrap();
        assert!(!shared.is_finished());
    }

    #[test]
    fn shared_volume_applies_to_new_buffers() {
        let (mut p, _clock, _rx) = open(FakeSourceSpec::default());
        let shared = p.shared();
        shared.set_volume(0.0);
        assert_eq!(p.volume(), 0.0);
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        p.pull(&mut buf);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn speed_change_rescales_clock() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        clock.set(8.0);
        p.set_speed(2.0).unwrap();
        assert!((clock.now_secs() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn seek_sets_clock_to_target() {
        let (mut p, clock, _rx) = open(FakeSourceSpec::default());
        p.seek(30_000).unwrap();
        assert!((clock.now_secs() - 30.0).abs() <= 1.0 / 30.0);
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        p.pull(&mut buf);
        let now = clock.now_secs();
        assert!(now > 30.0 && now < 30.1, "{now}");
    }

    #[test]
    fn finished_fires_once_with_final_position() {
        let (mut p, _clock, rx) = open(FakeSourceSpec {
            duration: 1.0,
            ..FakeSourceSpec::default()
        });
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        for _ in 0..60 {
            p.pull(&mut buf);
        }
        assert!(p.is_finished());
        assert!(buf.iter().all(|b| *b == 0));

        let events: Vec<PlayerEvent> = rx.try_iter().collect();
        let finished = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::PlaybackFinished))
            .count();
        assert_eq!(finished, 1);
        let idx = events
            .iter()
            .position(|e| matches!(e, PlayerEvent::PlaybackFinished))
            .unwrap();
        assert_eq!(
            events[idx - 1],
            PlayerEvent::PositionChanged { position_ms: 1000 }
        );
    }

    #[test]
    fn position_reports_are_rate_limited() {
        let (mut p, _clock, rx) = open(FakeSourceSpec::default());
        p.play(Instant::now());
        // 256-frame pulls: ~5.3ms each, 2 s total.
        let mut buf = vec![0u8; 256 * 2 * BYTES_PER_SAMPLE];
        for _ in 0..375 {
            p.pull(&mut buf);
        }
        let positions = rx
            .try_iter()
            .filter(|e| matches!(e, PlayerEvent::PositionChanged { .. }))
            .count();
        assert!((18..=22).contains(&positions), "{positions}");
    }

    #[test]
    fn decode_failures_are_skipped() {
        let (mut p, clock, _rx) = open(FakeSourceSpec {
            corrupt_audio_packets: vec![0, 1, 2],
            ..FakeSourceSpec::default()
        });
        p.play(Instant::now());
        let mut buf = device_buffer(&p);
        p.pull(&mut buf);
        assert!(clock.now_secs() > 0.0);
        assert!(buf.iter().any(|b| *b != 0));
    }
}
