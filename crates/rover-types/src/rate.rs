//! [`RateMeter`] – windowed frames-per-second accounting.
//!
//! Events are counted inside a window that resets once a full second has
//! elapsed.  [`RateMeter::rate`] reports the rate of the last *completed*
//! window, never an instantaneous value, so readers see a stable number.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Rolling per-second event counter.
#[derive(Debug, Clone)]
pub struct RateMeter {
    count: u32,
    window_start: Instant,
    last_rate: f64,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start the first window at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            count: 0,
            window_start: start,
            last_rate: 0.0,
        }
    }

    /// Count one event at the current time.
    ///
    /// Returns `Some(rate)` when this event closed a window.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Count one event observed at `now`.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= WINDOW {
            self.last_rate = f64::from(self.count) / elapsed.as_secs_f64();
            self.count = 0;
            self.window_start = now;
            Some(self.last_rate)
        } else {
            None
        }
    }

    /// Rate of the last completed window (`0.0` until one completes).
    pub fn rate(&self) -> f64 {
        self.last_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rate_before_first_window_closes() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);
        for i in 1..10 {
            assert!(meter.tick_at(start + Duration::from_millis(i * 50)).is_none());
        }
        assert_eq!(meter.rate(), 0.0);
    }

    #[test]
    fn window_reports_completed_rate() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);
        for i in 1..20 {
            meter.tick_at(start + Duration::from_millis(i * 50));
        }
        // 20th event lands exactly at the one-second mark.
        let rate = meter.tick_at(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
        assert!((meter.rate() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rate_is_held_until_next_window_closes() {
        let start = Instant::now();
        let mut meter = RateMeter::starting_at(start);
        meter.tick_at(start + Duration::from_secs(1));
        let held = meter.rate();
        meter.tick_at(start + Duration::from_millis(1100));
        assert_eq!(meter.rate(), held);
    }
}
