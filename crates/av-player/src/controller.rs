//! Playback controller: owns the state machine and wires both pipelines, the
//! audio output and the video timer together.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use av_player_types::{MediaInfo, PlayerEvent, PlayerState, PlayerStatus};
use crossbeam_channel::{Receiver, Sender};

use crate::clock::{AudioClock, ClockSource};
use crate::config::PlaybackConfig;
use crate::error::PlayerError;
use crate::pipeline::audio::secs_to_ms;
use crate::pipeline::audio::AudioShared;
use crate::pipeline::{AudioPipeline, AudioPull, FrameTimer, TickOutcome, VideoPipeline};
use crate::resample::fuzzy_eq;
use crate::source::{AudioOutput, AudioOutputFactory, MediaBackend, VideoSink};
use crate::state::{Transition, next_state};

/// Resources of one opened source.
///
/// Fields drop in declaration order: output first, then video, then audio.
struct Session {
    output: Box<dyn AudioOutput>,
    video: VideoPipeline,
    audio: Arc<Mutex<AudioPipeline>>,
    /// Finished flag and volume, reachable without the pipeline lock.
    audio_shared: Arc<AudioShared>,
    clock: Arc<AudioClock>,
    timer: FrameTimer,
    media: MediaInfo,
    duration_ms: Option<u64>,
    last_seek: Option<(Instant, u64)>,
}

impl Session {
    fn audio(&self) -> MutexGuard<'_, AudioPipeline> {
        self.audio.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct PlaybackController {
    session: Option<Session>,
    backend: Box<dyn MediaBackend>,
    outputs: Box<dyn AudioOutputFactory>,
    sink: Box<dyn VideoSink>,
    cfg: PlaybackConfig,
    events: Sender<PlayerEvent>,
    audio_done_tx: Sender<()>,
    audio_done_rx: Receiver<()>,
    state: PlayerState,
    volume: f32,
    speed: f64,
}

impl PlaybackController {
    pub fn new(
        backend: Box<dyn MediaBackend>,
        outputs: Box<dyn AudioOutputFactory>,
        sink: Box<dyn VideoSink>,
        cfg: PlaybackConfig,
        events: Sender<PlayerEvent>,
    ) -> Self {
        let (audio_done_tx, audio_done_rx) = crossbeam_channel::bounded(1);
        Self {
            session: None,
            backend,
            outputs,
            sink,
            cfg,
            events,
            audio_done_tx,
            audio_done_rx,
            state: PlayerState::Idle,
            volume: 1.0,
            speed: 1.0,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.cfg
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            tracing::info!(from = self.state.label(), to = state.label(), "state changed");
            self.state = state;
            let _ = self.events.send(PlayerEvent::StateChanged { state });
        }
    }

    fn report_error(&self, err: &PlayerError) {
        let _ = self.events.send(PlayerEvent::Error {
            reason: err.to_string(),
        });
    }

    fn session(&self, command: &'static str) -> Result<&Session, PlayerError> {
        self.session.as_ref().ok_or(PlayerError::InvalidState {
            command,
            state: self.state,
        })
    }

    /// Open `path`, replacing any current source. On failure the player is `Idle`.
    pub fn open(&mut self, path: &Path) -> Result<MediaInfo, PlayerError> {
        self.stop();
        match self.build_session(path) {
            Ok(session) => {
                let media = session.media.clone();
                tracing::info!(
                    path = %media.path,
                    duration_ms = ?media.duration_ms,
                    audio_codec = ?media.audio_codec,
                    video_codec = ?media.video_codec,
                    width = ?media.width,
                    height = ?media.height,
                    "source opened"
                );
                self.session = Some(session);
                let to = next_state(self.state, Transition::Open)?;
                self.set_state(to);
                Ok(media)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "open failed");
                self.report_error(&e);
                Err(e)
            }
        }
    }

    fn build_session(&mut self, path: &Path) -> Result<Session, PlayerError> {
        let clock = Arc::new(AudioClock::new());
        let mut audio = AudioPipeline::open(
            self.backend.as_ref(),
            path,
            clock.clone(),
            self.cfg.clone(),
            self.speed,
            self.events.clone(),
        )?;
        audio.set_volume(self.volume);
        audio.set_finish_waker(self.audio_done_tx.clone());
        let audio_shared = audio.shared();
        let video = VideoPipeline::open(
            self.backend.as_ref(),
            path,
            clock.clone(),
            self.cfg.clone(),
            self.speed,
        )?;
        let format = audio.format().clone();
        let audio = Arc::new(Mutex::new(audio));
        let output = self
            .outputs
            .open(&format, AudioPull::new(audio.clone()))?;
        let device_rate = output.sample_rate();
        if device_rate != format.sample_rate {
            audio
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_output_rate(device_rate)?;
        }

        let media = media_info(path, &audio.lock().unwrap_or_else(PoisonError::into_inner), &video);
        let duration_ms = media.duration_ms;
        let timer = FrameTimer::new(video.base_interval());
        Ok(Session {
            output,
            video,
            audio,
            audio_shared,
            clock,
            timer,
            media,
            duration_ms,
            last_seek: None,
        })
    }

    /// Start or resume playback. From `Ended`, restarts at zero.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        let to = next_state(self.state, Transition::Play)?;
        if self.state == PlayerState::Playing {
            return Ok(());
        }
        if self.state == PlayerState::Ended {
            self.reposition(0)?;
        }
        self.start_output()?;
        self.set_state(to);
        Ok(())
    }

    /// Resume from `Paused` (or start from `Ready`).
    pub fn resume(&mut self) -> Result<(), PlayerError> {
        let to = next_state(self.state, Transition::Resume)?;
        if self.state == PlayerState::Playing {
            return Ok(());
        }
        self.start_output()?;
        self.set_state(to);
        Ok(())
    }

    fn start_output(&mut self) -> Result<(), PlayerError> {
        let session = self
            .session
            .as_mut()
            .ok_or(PlayerError::InvalidState {
                command: "play",
                state: self.state,
            })?;
        let now = Instant::now();
        session.audio().play(now);
        if let Err(e) = session.output.resume() {
            session.audio().pause(now);
            self.report_error(&e);
            return Err(e);
        }
        let interval = session.video.base_interval();
        session.timer.rearm(interval, now);
        session.timer.start(now);
        Ok(())
    }

    /// Stop the timer and the device; the clock freezes at what was audible.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        let to = next_state(self.state, Transition::Pause)?;
        if self.state == PlayerState::Paused {
            return Ok(());
        }
        if let Some(session) = self.session.as_mut() {
            session.timer.stop();
            if let Err(e) = session.output.pause() {
                tracing::warn!(error = %e, "audio output pause failed");
            }
            session.audio().pause(Instant::now());
        }
        self.set_state(to);
        Ok(())
    }

    /// Tear everything down and return to `Idle`.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.timer.stop();
            if let Err(e) = session.output.pause() {
                tracing::debug!(error = %e, "audio output pause on stop failed");
            }
            drop(session);
            tracing::debug!("session released");
        }
        self.set_state(PlayerState::Idle);
    }

    /// Seek to `position_ms` (clamped to the duration).
    ///
    /// Returns `Ok(false)` when the request was debounced.
    pub fn seek(&mut self, position_ms: u64) -> Result<bool, PlayerError> {
        let to = next_state(self.state, Transition::Seek)?;
        let session = self.session("seek")?;
        let target = match session.duration_ms {
            Some(d) => position_ms.min(d),
            None => position_ms,
        };
        let now = Instant::now();
        if let Some((at, last)) = session.last_seek {
            if now.saturating_duration_since(at) < self.cfg.seek_debounce_window
                && target.abs_diff(last) < self.cfg.seek_debounce_distance.as_millis() as u64
            {
                tracing::debug!(position_ms = target, "seek debounced");
                return Ok(false);
            }
        }

        if let Err(e) = self.reposition(target) {
            self.report_error(&e);
            return Err(e);
        }
        if let Some(session) = self.session.as_mut() {
            session.last_seek = Some((now, target));
        }
        self.set_state(to);
        Ok(true)
    }

    /// Reposition both pipelines; the timer restarts if it was running.
    ///
    /// When the video side cannot follow, audio goes back to where it was so
    /// both pipelines keep playing from the same position.
    fn reposition(&mut self, target: u64) -> Result<(), PlayerError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let was_running = session.timer.is_active();
        let previous = secs_to_ms(session.clock.now_secs());
        session.timer.stop();
        let mut result = session.audio().seek(target);
        if result.is_ok() {
            result = session.video.seek(target, self.sink.as_mut()).map(|_| ());
            if result.is_err()
                && let Err(e) = session.audio().seek(previous)
            {
                tracing::warn!(position_ms = previous, error = %e, "audio seek rollback failed");
            }
        }
        let now = Instant::now();
        if was_running {
            session.clock.resume_at(now);
            session.timer.start(now);
        }
        result?;
        tracing::info!(position_ms = target, "seeked");
        Ok(())
    }

    /// Clamp and apply the output volume.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = self.cfg.clamp_volume(volume);
        if let Some(session) = self.session.as_ref() {
            session.audio_shared.set_volume(self.volume);
        }
        tracing::debug!(volume = self.volume, "volume set");
    }

    /// Change audio and video speed together.
    ///
    /// A failed resampler rebuild keeps the previous speed and playback state.
    pub fn set_speed(&mut self, speed: f64) -> Result<bool, PlayerError> {
        let new = self.cfg.clamp_speed(speed);
        if fuzzy_eq(new, self.speed) {
            return Ok(false);
        }
        let playing = self.state == PlayerState::Playing;
        let Some(session) = self.session.as_mut() else {
            self.speed = new;
            return Ok(true);
        };

        if playing {
            if let Err(e) = session.output.pause() {
                tracing::warn!(error = %e, "audio output pause failed");
            }
        }
        let result = session.audio().set_speed(new);
        if playing {
            if let Err(e) = session.output.resume() {
                tracing::warn!(error = %e, "audio output resume failed");
            }
        }
        if let Err(e) = result {
            tracing::warn!(speed = new, error = %e, "speed change rolled back");
            self.report_error(&e);
            return Err(e);
        }

        let interval = session.video.set_speed(new);
        if playing {
            session.timer.rearm(interval, Instant::now());
        }
        self.speed = new;
        Ok(true)
    }

    /// Run one video pump tick if the timer is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        if self.state != PlayerState::Playing {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.timer.deadline() {
            Some(deadline) if deadline <= now => {}
            _ => return,
        }
        match session.video.tick(self.sink.as_mut()) {
            TickOutcome::Presented { rearm, .. } => {
                if let Some(interval) = rearm {
                    session.timer.rearm(interval, now);
                } else {
                    session.timer.fired(now);
                }
            }
            TickOutcome::Skipped => session.timer.fired(now),
            TickOutcome::EndOfStream => {
                session.timer.stop();
                let end_ms = session
                    .duration_ms
                    .unwrap_or_else(|| secs_to_ms(session.clock.now_secs()));
                let _ = self.events.send(PlayerEvent::PositionChanged { position_ms: end_ms });
                tracing::info!(position_ms = end_ms, "video end of stream");
                if let Ok(to) = next_state(self.state, Transition::VideoEnded) {
                    self.set_state(to);
                }
            }
        }
    }

    /// When the video timer next wants [`Self::tick`].
    pub fn next_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.timer.deadline())
    }

    /// Current timer interval, for diagnostics.
    pub fn timer_interval(&self) -> Option<Duration> {
        self.session.as_ref().map(|s| s.timer.interval())
    }

    /// `true` once the audio stream drained completely.
    pub fn audio_finished(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.audio_shared.is_finished())
            .unwrap_or(false)
    }

    /// Receives `()` whenever an audio stream finishes draining.
    pub fn audio_done(&self) -> Receiver<()> {
        self.audio_done_rx.clone()
    }

    pub fn status(&self) -> PlayerStatus {
        let (position_ms, duration_ms, media) = match self.session.as_ref() {
            Some(s) => {
                let pos = secs_to_ms(s.clock.now_secs());
                let pos = s.duration_ms.map(|d| pos.min(d)).unwrap_or(pos);
                (pos, s.duration_ms, Some(s.media.clone()))
            }
            None => (0, None, None),
        };
        PlayerStatus {
            state: self.state,
            position_ms,
            duration_ms,
            volume: self.volume,
            speed: self.speed,
            media,
        }
    }

    /// Pull handle of the open session, as the output device sees it.
    pub fn audio_pull(&self) -> Option<AudioPull> {
        self.session.as_ref().map(|s| AudioPull::new(s.audio.clone()))
    }

    /// Read-only clock of the open session.
    pub fn clock(&self) -> Option<Arc<dyn ClockSource>> {
        self.session
            .as_ref()
            .map(|s| s.clock.clone() as Arc<dyn ClockSource>)
    }
}

fn media_info(path: &Path, audio: &AudioPipeline, video: &VideoPipeline) -> MediaInfo {
    let duration = audio
        .duration()
        .into_iter()
        .chain(video.duration())
        .fold(None::<f64>, |acc, d| Some(acc.map_or(d, |a| a.max(d))));
    let a = audio.format();
    let v = video.format();
    MediaInfo {
        path: path.display().to_string(),
        duration_ms: duration.map(secs_to_ms),
        audio_codec: Some(audio.stream().codec.clone()),
        sample_rate: Some(a.sample_rate),
        channels: Some(a.channels),
        sample_format: Some(a.sample_format.clone()),
        video_codec: Some(video.stream().codec.clone()),
        width: Some(v.width),
        height: Some(v.height),
        frame_rate: v.avg_frame_rate,
        pixel_format: Some(v.pixel_format.clone()),
    }
}
