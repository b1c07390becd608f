//! Video pump: one frame per timer tick, paced by the synchronizer.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::ClockSource;
use crate::config::PlaybackConfig;
use crate::error::PlayerError;
use crate::source::{
    DecodeStatus, Demuxer, MediaBackend, MediaKind, StreamInfo, VideoDecoder, VideoFrame,
    VideoSink, VideoStreamState,
};
use crate::sync::Synchronizer;

/// What a single pump tick did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// A frame went to the sink; `rearm` carries a new timer interval if it changed.
    Presented { pts: f64, rearm: Option<Duration> },
    /// No frame this tick (packet attempts or conversion ran out); try again next tick.
    Skipped,
    /// The decoder drained; nothing more will be presented.
    EndOfStream,
}

/// Repeating timer whose interval can change between ticks.
#[derive(Debug)]
pub struct FrameTimer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl FrameTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval; an active timer restarts from `now`.
    pub fn rearm(&mut self, interval: Duration, now: Instant) {
        self.interval = interval;
        if self.deadline.is_some() {
            self.deadline = Some(now + interval);
        }
    }

    /// The timer fired at `now`; schedule the next shot.
    pub fn fired(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(now + self.interval);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Owns every video resource of one opened source.
///
/// Fields drop in declaration order, the reverse of acquisition.
pub struct VideoPipeline {
    frame: VideoFrame,
    decoder: Box<dyn VideoDecoder>,
    demuxer: Box<dyn Demuxer>,
    stream: StreamInfo,
    format: VideoStreamState,
    sync: Synchronizer,
    cfg: PlaybackConfig,
    duration: Option<f64>,
    speed: f64,
    /// Frames decoded since open or the last seek; timestamps fall back to it.
    frame_counter: u64,
    input_eof: bool,
}

impl VideoPipeline {
    /// Open the best video stream of `path`, its decoder and the presentation frame.
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        clock: Arc<dyn ClockSource>,
        cfg: PlaybackConfig,
        speed: f64,
    ) -> Result<Self, PlayerError> {
        let demuxer = backend.open_video(path)?;
        let stream = demuxer
            .best_stream(MediaKind::Video)
            .ok_or(PlayerError::StreamNotFound { kind: "video" })?;
        let format = stream
            .video()
            .cloned()
            .ok_or(PlayerError::StreamNotFound { kind: "video" })?;
        let decoder = demuxer.open_video_decoder(&stream)?;
        let frame = VideoFrame::allocate(format.width, format.height)?;
        let duration = demuxer.duration();
        let interval = format.frame_interval(cfg.fallback_frame_rate);
        let sync = Synchronizer::new(clock, cfg.sync.clone(), interval);

        tracing::info!(
            codec = %stream.codec,
            width = format.width,
            height = format.height,
            fps = format.avg_frame_rate.unwrap_or(cfg.fallback_frame_rate),
            pixel_format = %format.pixel_format,
            "video stream opened"
        );

        Ok(Self {
            frame,
            decoder,
            demuxer,
            stream,
            format,
            sync,
            speed: cfg.clamp_speed(speed),
            cfg,
            duration,
            frame_counter: 0,
            input_eof: false,
        })
    }

    pub fn format(&self) -> &VideoStreamState {
        &self.format
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Timer interval at the current speed, before any sync correction.
    pub fn base_interval(&self) -> Duration {
        let secs = self.sync.nominal_interval() / self.speed;
        Duration::from_secs_f64(secs.clamp(
            self.cfg.sync.min_delay.as_secs_f64(),
            self.cfg.sync.max_delay.as_secs_f64(),
        ))
    }

    /// Store a new speed and return the interval the timer should run at.
    pub fn set_speed(&mut self, speed: f64) -> Duration {
        self.speed = self.cfg.clamp_speed(speed);
        let interval = self.base_interval();
        self.sync.note_armed(interval);
        interval
    }

    /// Timestamp of the frame in the decoder slot, falling back to the frame counter.
    fn frame_time(&mut self, pts: Option<f64>) -> f64 {
        let fallback = self.frame_counter as f64 * self.sync.nominal_interval();
        self.frame_counter += 1;
        pts.unwrap_or(fallback)
    }

    /// Feed one packet from the demuxer. `Ok(false)` once input is exhausted.
    fn feed(&mut self) -> Result<bool, PlayerError> {
        if self.input_eof {
            return Ok(false);
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
        Ok(true)
    }

    /// Decode the next frame, present it and compute the next timer interval.
    pub fn tick(&mut self, sink: &mut dyn VideoSink) -> TickOutcome {
        let mut attempts = 0;
        let mut failures = 0;
        loop {
            match self.decoder.receive_frame() {
                Ok(DecodeStatus::Frame(pts)) => return self.present(pts, sink),
                Ok(DecodeStatus::Drained) => return TickOutcome::EndOfStream,
                Ok(DecodeStatus::Again) => {
                    if self.input_eof {
                        // Decoder produced nothing after EOF; treat as drained.
                        return TickOutcome::EndOfStream;
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "video decode error");
                }
            }
            if failures >= self.cfg.decode_retry_limit {
                tracing::warn!(failures, "video decode retry limit reached");
                return TickOutcome::EndOfStream;
            }
            if attempts >= self.cfg.video_packet_attempts {
                return TickOutcome::Skipped;
            }
            attempts += 1;
            if let Err(e) = self.feed() {
                failures += 1;
                tracing::warn!(error = %e, failures, "video packet rejected");
            }
        }
    }

    fn present(&mut self, pts: Option<f64>, sink: &mut dyn VideoSink) -> TickOutcome {
        let raw = self.frame_time(pts);
        if let Err(e) = self.decoder.convert_into(&mut self.frame) {
            tracing::warn!(error = %e, pts = raw, "frame conversion failed");
            return TickOutcome::Skipped;
        }
        let decision = self.sync.on_frame(raw, self.speed);
        self.frame.pts = decision.pts;
        sink.present(&self.frame);
        TickOutcome::Presented {
            pts: decision.pts,
            rearm: decision.rearm,
        }
    }

    /// Two-phase seek: keyframe seek plus flush, then decode forward to the target.
    ///
    /// Returns the timestamp of the frame presented at the new position, if any.
    pub fn seek(
        &mut self,
        position_ms: u64,
        sink: &mut dyn VideoSink,
    ) -> Result<Option<f64>, PlayerError> {
        let target = position_ms as f64 / 1000.0;
        self.demuxer
            .seek(self.stream.index, target)
            .map_err(|e| PlayerError::Seek {
                target_ms: position_ms,
                reason: e.to_string(),
            })?;
        self.decoder.flush();
        self.input_eof = false;
        self.frame_counter = (target / self.sync.nominal_interval()).floor() as u64;

        let tolerance = self.cfg.seek_tolerance.as_secs_f64();
        let earliest = target - self.cfg.seek_skip_distance.as_secs_f64();
        let mut empty_reads = 0;
        let mut candidate: Option<f64> = None;
        let mut matched: Option<f64> = None;
        let mut dropped = 0u32;

        while empty_reads < self.cfg.seek_max_empty_reads {
            match self.decoder.receive_frame() {
                Ok(DecodeStatus::Frame(pts)) => {
                    let t = self.frame_time(pts);
                    empty_reads = 0;
                    if t >= target || (t - target).abs() < tolerance {
                        matched = Some(t);
                        break;
                    }
                    if t >= earliest {
                        candidate = Some(t);
                    }
                    dropped += 1;
                    continue;
                }
                Ok(DecodeStatus::Drained) => break,
                Ok(DecodeStatus::Again) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "decode error during seek");
                }
            }
            empty_reads += 1;
            match self.feed() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => tracing::debug!(error = %e, "packet rejected during seek"),
            }
        }

        let shown = matched.or(candidate);
        if let Some(t) = shown {
            match self.decoder.convert_into(&mut self.frame) {
                Ok(()) => {
                    self.frame.pts = t + self.sync.compensation();
                    sink.present(&self.frame);
                }
                Err(e) => tracing::warn!(error = %e, "seek frame conversion failed"),
            }
        }

        // Drop output the decoder already buffered past the presented frame.
        let mut drained = 0u32;
        if matched.is_some() {
            while let Ok(DecodeStatus::Frame(_)) = self.decoder.receive_frame() {
                self.frame_counter += 1;
                drained += 1;
            }
        }

        tracing::debug!(
            position_ms,
            presented = ?shown,
            dropped,
            drained,
            "video seek done"
        );
        Ok(shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AudioClock;
    use crate::testing::{FakeBackend, FakeSourceSpec, RecordingSink};

    fn open(spec: FakeSourceSpec) -> (VideoPipeline, Arc<AudioClock>) {
        let clock = Arc::new(AudioClock::new());
        let backend = FakeBackend::new(spec);
        let pipeline = VideoPipeline::open(
            &backend,
            Path::new("fake.mp4"),
            clock.clone(),
            PlaybackConfig::default(),
            1.0,
        )
        .unwrap();
        (pipeline, clock)
    }

    fn presented(outcome: TickOutcome) -> f64 {
        match outcome {
            TickOutcome::Presented { pts, .. } => pts,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn tick_presents_frames_in_order_from_zero() {
        let (mut v, _clock) = open(FakeSourceSpec::default());
        let mut sink = RecordingSink::default();
        let first = presented(v.tick(&mut sink));
        assert_eq!(first, 0.0);
        let second = presented(v.tick(&mut sink));
        assert!((second - 1.0 / 30.0).abs() < 1e-9);
        assert_eq!(sink.frames().len(), 2);
        assert_eq!(sink.frames()[0].width, 8);
    }

    #[test]
    fn missing_timestamps_fall_back_to_frame_counter() {
        let (mut v, _clock) = open(FakeSourceSpec {
            video_pts: false,
            ..FakeSourceSpec::default()
        });
        let mut sink = RecordingSink::default();
        let pts: Vec<f64> = (0..4).map(|_| presented(v.tick(&mut sink))).collect();
        for (i, p) in pts.iter().enumerate() {
            assert!((p - i as f64 / 30.0).abs() < 1e-9);
        }
    }

    #[test]
    fn end_of_stream_after_last_frame() {
        let (mut v, _clock) = open(FakeSourceSpec {
            duration: 0.5,
            ..FakeSourceSpec::default()
        });
        let mut sink = RecordingSink::default();
        let mut frames = 0;
        loop {
            match v.tick(&mut sink) {
                TickOutcome::Presented { .. } => frames += 1,
                TickOutcome::Skipped => {}
                TickOutcome::EndOfStream => break,
            }
            assert!(frames <= 15);
        }
        assert_eq!(frames, 15);
    }

    #[test]
    fn seek_lands_on_target_frame() {
        let (mut v, _clock) = open(FakeSourceSpec::default());
        let mut sink = RecordingSink::default();
        let shown = v.seek(30_000, &mut sink).unwrap().unwrap();
        assert!((shown - 30.0).abs() < 0.1);
        assert_eq!(sink.frames().len(), 1);
        let next = presented(v.tick(&mut sink));
        assert!(next > shown);
    }

    #[test]
    fn seek_past_end_shows_last_frame() {
        let (mut v, _clock) = open(FakeSourceSpec {
            duration: 2.0,
            ..FakeSourceSpec::default()
        });
        let mut sink = RecordingSink::default();
        let shown = v.seek(5_000, &mut sink).unwrap().unwrap();
        assert!((shown - 59.0 / 30.0).abs() < 1e-9);
        assert_eq!(sink.frames().len(), 1);
        assert_eq!(v.tick(&mut sink), TickOutcome::EndOfStream);
    }

    #[test]
    fn speed_sets_base_interval() {
        let (mut v, _clock) = open(FakeSourceSpec::default());
        let interval = v.set_speed(2.0);
        assert!((interval.as_secs_f64() - 1.0 / 60.0).abs() < 1e-6);
        let interval = v.set_speed(9.0);
        assert!((interval.as_secs_f64() - 1.0 / 60.0).abs() < 1e-6);
    }

    #[test]
    fn timer_rearm_and_fire() {
        let now = Instant::now();
        let mut timer = FrameTimer::new(Duration::from_millis(33));
        assert!(timer.deadline().is_none());
        timer.rearm(Duration::from_millis(20), now);
        assert!(timer.deadline().is_none());
        timer.start(now);
        assert_eq!(timer.deadline(), Some(now + Duration::from_millis(20)));
        let later = now + Duration::from_millis(25);
        timer.fired(later);
        assert_eq!(timer.deadline(), Some(later + Duration::from_millis(20)));
        timer.stop();
        assert!(!timer.is_active());
    }
}
