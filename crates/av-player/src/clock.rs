//! Audio clock: the synchronization reference shared with the video pump.
//!
//! Written by the audio pipeline (decode-time anchors and bytes handed to the
//! device), read by the synchronizer through [`ClockSource`]. The lock only ever
//! guards the numeric fields.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Read-only view of the playback clock.
pub trait ClockSource: Send + Sync {
    /// Current audible position in seconds.
    fn now_secs(&self) -> f64;
}

#[derive(Debug, Default)]
struct ClockState {
    secs: f64,
    /// Wall-clock instant of the last known play progress; `None` while stopped or paused.
    anchor: Option<Instant>,
}

/// Seconds of source time that are currently audible.
#[derive(Debug, Default)]
pub struct AudioClock {
    state: Mutex<ClockState>,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Back to zero with no play anchor (fresh source).
    pub fn reset(&self) {
        let mut st = self.lock();
        st.secs = 0.0;
        st.anchor = None;
    }

    /// Jump straight to `secs` (seek target).
    pub fn set(&self, secs: f64) {
        let mut st = self.lock();
        st.secs = secs.max(0.0);
        if st.anchor.is_some() {
            st.anchor = Some(Instant::now());
        }
    }

    /// Add `delta` seconds of consumed audio, observed at `now`.
    pub fn advance(&self, delta: f64, now: Instant) {
        if !delta.is_finite() || delta <= 0.0 {
            return;
        }
        let mut st = self.lock();
        st.secs += delta;
        st.anchor = Some(now);
    }

    /// Re-anchor on a decoded frame timestamp.
    ///
    /// Moves forward freely; moves backward only when the gap exceeds `tolerance`.
    pub fn observe_pts(&self, pts: f64, tolerance: Duration) {
        if !pts.is_finite() || pts < 0.0 {
            return;
        }
        let mut st = self.lock();
        if pts > st.secs || st.secs - pts > tolerance.as_secs_f64() {
            st.secs = pts;
        }
    }

    /// Multiply the current value by `factor` (speed change `old / new`).
    pub fn rescale(&self, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let mut st = self.lock();
        st.secs *= factor;
    }

    /// Output (re)started at `now`.
    pub fn resume_at(&self, now: Instant) {
        self.lock().anchor = Some(now);
    }

    /// Output paused at `now`: integrate the wall time since the last progress.
    ///
    /// The integrated span is capped at `max_gap` (one device buffer), which is the
    /// most audio the device could have played since it last pulled.
    pub fn pause_at(&self, now: Instant, speed: f64, max_gap: Duration) {
        let mut st = self.lock();
        if let Some(anchor) = st.anchor.take() {
            let elapsed = now.saturating_duration_since(anchor).min(max_gap);
            st.secs += elapsed.as_secs_f64() * speed;
        }
    }

    /// `true` while the clock is anchored to running output.
    pub fn is_running(&self) -> bool {
        self.lock().anchor.is_some()
    }
}

impl ClockSource for AudioClock {
    fn now_secs(&self) -> f64 {
        self.lock().secs
    }
}
