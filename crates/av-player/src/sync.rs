//! Video pacing against the audio clock.
//!
//! Audio is the reference. Every presented frame yields the delay before the next
//! timer tick: the nominal frame interval scaled by speed, nudged by a banded
//! factor depending on how far the frame is from the audio clock, then clamped.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::ClockSource;
use crate::config::SyncConfig;

/// Pure banded correction: next delay in seconds for a frame `diff` seconds
/// ahead (positive) or behind (negative) of the audio clock.
pub fn banded_delay(cfg: &SyncConfig, nominal_interval: f64, speed: f64, diff: f64) -> f64 {
    let base = nominal_interval / speed;
    let magnitude = diff.abs();
    let factors = if magnitude < cfg.band_none.as_secs_f64() {
        None
    } else if magnitude < cfg.band_light.as_secs_f64() {
        Some(cfg.light_factors)
    } else if magnitude < cfg.band_medium.as_secs_f64() {
        Some(cfg.medium_factors)
    } else {
        Some(cfg.strong_factors)
    };
    let delay = match factors {
        None => base,
        Some((ahead, behind)) => base * if diff > 0.0 { ahead } else { behind },
    };
    let lo = cfg.min_delay.as_secs_f64();
    let hi = cfg.max_delay.as_secs_f64();
    if delay.is_finite() { delay.clamp(lo, hi) } else { hi }
}

/// Per-source synchronizer state.
pub struct Synchronizer {
    clock: Arc<dyn ClockSource>,
    cfg: SyncConfig,
    nominal_interval: f64,
    compensation: f64,
    startup_total: f64,
    startup_seen: u32,
    armed: Option<Duration>,
}

/// Scheduling decision for one presented frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncDecision {
    /// Compensated frame timestamp.
    pub pts: f64,
    /// Clamped delay until the next tick.
    pub delay: Duration,
    /// `Some` when the timer should be re-armed to this interval.
    pub rearm: Option<Duration>,
}

impl Synchronizer {
    pub fn new(clock: Arc<dyn ClockSource>, cfg: SyncConfig, nominal_interval: f64) -> Self {
        Self {
            clock,
            cfg,
            nominal_interval,
            compensation: 0.0,
            startup_total: 0.0,
            startup_seen: 0,
            armed: None,
        }
    }

    /// Forget everything learned from the previous source.
    pub fn reset(&mut self, nominal_interval: f64) {
        self.nominal_interval = nominal_interval;
        self.compensation = 0.0;
        self.startup_total = 0.0;
        self.startup_seen = 0;
        self.armed = None;
    }

    pub fn nominal_interval(&self) -> f64 {
        self.nominal_interval
    }

    pub fn compensation(&self) -> f64 {
        self.compensation
    }

    /// Record an externally armed timer interval (speed change, resume).
    pub fn note_armed(&mut self, interval: Duration) {
        self.armed = Some(interval);
    }

    /// Apply startup compensation to a raw frame timestamp.
    fn adjust(&mut self, raw_pts: f64, audio: f64) -> f64 {
        if self.startup_seen < self.cfg.startup_frames {
            self.startup_seen += 1;
            self.startup_total += (audio - raw_pts).max(0.0);
            self.compensation = self.startup_total / self.startup_seen as f64;
            if self.startup_seen == self.cfg.startup_frames {
                tracing::debug!(
                    compensation_ms = self.compensation * 1000.0,
                    "startup compensation fixed"
                );
            }
        }
        raw_pts + self.compensation
    }

    /// Schedule the tick after presenting a frame stamped `raw_pts`.
    pub fn on_frame(&mut self, raw_pts: f64, speed: f64) -> SyncDecision {
        let audio = self.clock.now_secs();
        let pts = self.adjust(raw_pts, audio);
        let diff = pts - audio;
        let secs = banded_delay(&self.cfg, self.nominal_interval, speed, diff);
        let delay = Duration::from_secs_f64(secs);
        let rearm = match self.armed {
            Some(prev) if abs_diff(prev, delay) <= self.cfg.rearm_hysteresis => None,
            _ => {
                self.armed = Some(delay);
                Some(delay)
            }
        };
        tracing::trace!(pts, audio, diff, delay_ms = secs * 1000.0, "sync");
        SyncDecision { pts, delay, rearm }
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b { a - b } else { b - a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedClock(Mutex<f64>);

    impl FixedClock {
        fn set(&self, v: f64) {
            *self.0.lock().unwrap() = v;
        }
    }

    impl ClockSource for FixedClock {
        fn now_secs(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    fn cfg() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn bands_scale_the_base_delay() {
        let c = cfg();
        let base = 1.0 / 30.0;
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(banded_delay(&c, base, 1.0, 0.005), base));
        assert!(close(banded_delay(&c, base, 1.0, 0.015), base * 1.03));
        assert!(close(banded_delay(&c, base, 1.0, -0.015), base * 0.97));
        assert!(close(banded_delay(&c, base, 1.0, 0.030), base * 1.07));
        assert!(close(banded_delay(&c, base, 1.0, -0.030), base * 0.93));
        assert!(close(banded_delay(&c, base, 1.0, 0.5), base * 1.12));
        assert!(close(banded_delay(&c, base, 1.0, -0.5), base * 0.88));
    }

    #[test]
    fn delay_always_within_bounds() {
        let c = cfg();
        let diffs = [-1e9, -10.0, -0.04, -0.011, 0.0, 0.011, 0.04, 10.0, 1e9];
        let speeds = [0.5, 0.75, 1.0, 1.5, 2.0];
        let intervals = [1.0 / 240.0, 1.0 / 60.0, 1.0 / 30.0, 1.0 / 24.0, 0.5, 2.0];
        for &d in &diffs {
            for &s in &speeds {
                for &i in &intervals {
                    let v = banded_delay(&c, i, s, d);
                    assert!((0.010..=0.200).contains(&v), "diff={d} speed={s} interval={i} -> {v}");
                }
            }
        }
    }

    #[test]
    fn startup_compensation_averages_positive_lag() {
        let clock = Arc::new(FixedClock(Mutex::new(0.0)));
        let mut sync = Synchronizer::new(clock.clone(), cfg(), 1.0 / 30.0);

        // Audio leads by 40ms on frames 1-4, trails on frame 5.
        for i in 0..4 {
            let pts = i as f64 / 30.0;
            clock.set(pts + 0.040);
            sync.on_frame(pts, 1.0);
        }
        clock.set(0.0);
        sync.on_frame(4.0 / 30.0, 1.0);
        assert!((sync.compensation() - 0.032).abs() < 1e-9);

        // Fixed from now on.
        clock.set(10.0);
        let d = sync.on_frame(5.0, 1.0);
        assert!((sync.compensation() - 0.032).abs() < 1e-9);
        assert!((d.pts - 5.032).abs() < 1e-9);
    }

    #[test]
    fn rearm_respects_hysteresis() {
        let clock = Arc::new(FixedClock(Mutex::new(0.0)));
        let mut c = cfg();
        c.startup_frames = 0;
        let mut sync = Synchronizer::new(clock.clone(), c, 1.0 / 30.0);

        let first = sync.on_frame(0.0, 1.0);
        assert!(first.rearm.is_some());
        // Same band, same delay: no re-arm.
        let second = sync.on_frame(0.001, 1.0);
        assert!(second.rearm.is_none());
        // Video far ahead: longer delay, re-armed.
        let third = sync.on_frame(1.0, 1.0);
        assert!(third.rearm.is_some());
        assert!(third.delay > first.delay);
    }

    #[test]
    fn reset_clears_learned_state() {
        let clock = Arc::new(FixedClock(Mutex::new(1.0)));
        let mut sync = Synchronizer::new(clock, cfg(), 1.0 / 30.0);
        sync.on_frame(0.5, 1.0);
        assert!(sync.compensation() > 0.0);
        sync.reset(1.0 / 25.0);
        assert_eq!(sync.compensation(), 0.0);
        assert!((sync.nominal_interval() - 0.04).abs() < 1e-12);
    }
}
