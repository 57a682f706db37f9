//! Playback clock.
//!
//! Maps host monotonic time onto media time at a variable rate. The clock
//! stores a media timestamp `pts` and the host instant it was last folded
//! at; while running, the current media time is
//! `pts + (now - last_updated - hold) * speed`.
//!
//! `hold` is the part of the output latency not yet played out. It is
//! re-armed whenever the output starts from an empty buffer (resume, jump
//! or a new latency), so the position holds still for that long and then
//! advances. Pausing folds the audible position, which keeps the reported
//! time continuous across pause and resume.

use bridge_traits::time::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Media clock driven by an injectable [`Clock`].
pub struct PlaybackClock {
    source: Arc<dyn Clock>,
    pts: Duration,
    last_updated: Duration,
    speed: f32,
    paused: bool,
    latency: Duration,
    /// Host time left before media time starts advancing.
    hold: Duration,
}

impl PlaybackClock {
    /// Paused clock at media time zero, speed 1.0.
    pub fn new(source: Arc<dyn Clock>) -> Self {
        let now = source.now();
        Self {
            source,
            pts: Duration::ZERO,
            last_updated: now,
            speed: 1.0,
            paused: true,
            latency: Duration::ZERO,
            hold: Duration::ZERO,
        }
    }

    /// Host time since the last fold, and the part of it spent holding.
    fn split_elapsed(&self, now: Duration) -> (Duration, Duration) {
        let elapsed = now.saturating_sub(self.last_updated);
        let held = elapsed.min(self.hold);
        (elapsed - held, held)
    }

    /// Fold elapsed time into `pts` so rate or pause changes start from the
    /// current position.
    fn fold(&mut self) {
        let now = self.source.now();
        if !self.paused {
            let (advancing, held) = self.split_elapsed(now);
            self.pts += advancing.mul_f64(self.speed as f64);
            self.hold -= held;
        }
        self.last_updated = now;
    }

    /// Current media time.
    pub fn get(&self) -> Duration {
        if self.paused {
            return self.pts;
        }
        let (advancing, _) = self.split_elapsed(self.source.now());
        self.pts + advancing.mul_f64(self.speed as f64)
    }

    /// Jump to `pts` without changing the paused flag.
    pub fn set(&mut self, pts: Duration) {
        self.pts = pts;
        self.last_updated = self.source.now();
        self.hold = self.latency;
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.fold();
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.last_updated = self.source.now();
        self.hold = self.latency;
        self.paused = false;
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.fold();
        self.speed = speed;
    }

    /// Back to a paused zero. Speed and latency are kept.
    pub fn reset(&mut self) {
        self.pts = Duration::ZERO;
        self.last_updated = self.source.now();
        self.hold = Duration::ZERO;
        self.paused = true;
    }

    /// Output latency the running position lags behind after every start.
    pub fn set_latency(&mut self, latency: Duration) {
        self.fold();
        self.latency = latency;
        self.hold = latency;
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Host time until media time reaches `target`.
    ///
    /// `None` while paused, zero when `target` is already due.
    pub fn delay_until(&self, target: Duration) -> Option<Duration> {
        if self.paused {
            return None;
        }
        let now = self.get();
        if target <= now {
            return Some(Duration::ZERO);
        }
        let (_, held) = self.split_elapsed(self.source.now());
        let holding = self.hold - held;
        Some(holding + (target - now).div_f64(self.speed as f64))
    }

    /// Host monotonic time.
    pub fn host_now(&self) -> Duration {
        self.source.now()
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("pts", &self.pts)
            .field("speed", &self.speed)
            .field("paused", &self.paused)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;

    fn clock() -> (Arc<ManualClock>, PlaybackClock) {
        let source = Arc::new(ManualClock::new());
        let clock = PlaybackClock::new(source.clone());
        (source, clock)
    }

    #[test]
    fn test_paused_clock_does_not_advance() {
        let (source, clock) = clock();
        source.advance(Duration::from_secs(3));
        assert_eq!(clock.get(), Duration::ZERO);
    }

    #[test]
    fn test_running_clock_advances_at_speed() {
        let (source, mut clock) = clock();
        clock.resume();
        source.advance(Duration::from_secs(1));
        assert_eq!(clock.get(), Duration::from_secs(1));

        clock.set_speed(2.0);
        source.advance(Duration::from_secs(1));
        assert_eq!(clock.get(), Duration::from_secs(3));
    }

    #[test]
    fn test_pause_folds_elapsed_time() {
        let (source, mut clock) = clock();
        clock.resume();
        source.advance(Duration::from_millis(750));
        clock.pause();
        source.advance(Duration::from_secs(5));

        assert_eq!(clock.get(), Duration::from_millis(750));

        clock.resume();
        source.advance(Duration::from_millis(250));
        assert_eq!(clock.get(), Duration::from_secs(1));
    }

    #[test]
    fn test_reset_keeps_speed() {
        let (source, mut clock) = clock();
        clock.set_speed(1.5);
        clock.resume();
        source.advance(Duration::from_secs(2));
        clock.reset();

        assert!(clock.is_paused());
        assert_eq!(clock.get(), Duration::ZERO);
        assert_eq!(clock.speed(), 1.5);
    }

    #[test]
    fn test_latency_is_subtracted_while_running() {
        let (source, mut clock) = clock();
        clock.set_latency(Duration::from_millis(100));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.get(), Duration::from_secs(1));

        clock.resume();
        source.advance(Duration::from_millis(500));
        assert_eq!(clock.get(), Duration::from_millis(1400));
    }

    #[test]
    fn test_latency_keeps_pause_and_resume_continuous() {
        let (source, mut clock) = clock();
        clock.set_latency(Duration::from_millis(100));
        clock.resume();
        source.advance(Duration::from_millis(600));
        assert_eq!(clock.get(), Duration::from_millis(500));

        clock.pause();
        assert_eq!(clock.get(), Duration::from_millis(500));
        source.advance(Duration::from_secs(2));
        assert_eq!(clock.get(), Duration::from_millis(500));

        clock.resume();
        assert_eq!(clock.get(), Duration::from_millis(500));
        source.advance(Duration::from_millis(60));
        assert_eq!(clock.get(), Duration::from_millis(500));
        source.advance(Duration::from_millis(140));
        assert_eq!(clock.get(), Duration::from_millis(600));
    }

    #[test]
    fn test_speed_change_does_not_rearm_latency() {
        let (source, mut clock) = clock();
        clock.set_latency(Duration::from_millis(100));
        clock.resume();
        source.advance(Duration::from_millis(300));
        clock.set_speed(2.0);
        source.advance(Duration::from_millis(100));
        assert_eq!(clock.get(), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_until_includes_remaining_latency() {
        let (source, mut clock) = clock();
        clock.set_latency(Duration::from_millis(100));
        clock.resume();
        source.advance(Duration::from_millis(40));
        assert_eq!(
            clock.delay_until(Duration::from_millis(50)),
            Some(Duration::from_millis(110))
        );
    }

    #[test]
    fn test_delay_until_scales_by_speed() {
        let (_source, mut clock) = clock();
        assert_eq!(clock.delay_until(Duration::from_secs(1)), None);

        clock.resume();
        clock.set_speed(2.0);
        assert_eq!(
            clock.delay_until(Duration::from_secs(1)),
            Some(Duration::from_millis(500))
        );
        assert_eq!(clock.delay_until(Duration::ZERO), Some(Duration::ZERO));
    }
}
