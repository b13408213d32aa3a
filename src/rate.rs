//! Fixed-period loop pacing

use std::thread;
use std::time::{Duration, Instant};

/// Sleeps each loop iteration up to the next period boundary.
///
/// If an iteration overruns by more than a full period the schedule restarts from
/// now instead of firing a burst of catch-up iterations.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    next: Instant,
}

impl Rate {
    pub fn from_hz(hz: u32) -> Self {
        Self::from_period(Duration::from_secs_f64(1.0 / f64::from(hz.max(1))))
    }

    pub fn from_period(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn sleep(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else if now - self.next > self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
    }
}
