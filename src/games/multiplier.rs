//! Time-based multiplier clock
//!
//! The multiplier rises linearly from 1.00 to the crash point over a fixed
//! duration budget. Values are rounded to 2 decimals, so the rounded value can
//! reach the crash point shortly before the budget elapses.

use super::types::round_to;
use std::time::Duration;
use tokio::time::Instant;

/// Default duration budget of the multiplier phase
pub const DEFAULT_ROUND_DURATION: Duration = Duration::from_millis(10_000);

/// Default interval between multiplier updates
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// One reading of the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub multiplier: f64,
    pub progress: f64,
    pub elapsed: Duration,
    /// The round must crash at this sample
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct MultiplierClock {
    started_at: Instant,
    duration: Duration,
    crash_point: f64,
}

impl MultiplierClock {
    pub fn starting_at(started_at: Instant, crash_point: f64, duration: Duration) -> Self {
        Self {
            started_at,
            duration,
            crash_point,
        }
    }

    pub fn crash_point(&self) -> f64 {
        self.crash_point
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Fraction of the duration budget consumed, clamped to `[0, 1]`
    pub fn progress_at(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed_at(now).as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub fn multiplier_at(&self, now: Instant) -> f64 {
        let progress = self.progress_at(now);
        round_to(1.0 + (self.crash_point - 1.0) * progress, 2).min(self.crash_point)
    }

    pub fn sample_at(&self, now: Instant) -> ClockSample {
        let progress = self.progress_at(now);
        let multiplier = self.multiplier_at(now);
        ClockSample {
            multiplier,
            progress,
            elapsed: self.elapsed_at(now),
            finished: progress >= 1.0 || multiplier >= self.crash_point,
        }
    }

    pub fn sample(&self) -> ClockSample {
        self.sample_at(Instant::now())
    }
}
